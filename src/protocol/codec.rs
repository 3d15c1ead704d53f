//! Stateful frame codec.
//!
//! The decoder reassembles one frame at a time from an arbitrary byte
//! stream: bytes accumulate in an internal buffer until the zero terminator
//! byte is seen, at which point the buffered text is parsed and the buffer
//! reset. Feeding a stream byte by byte yields exactly the frames that
//! decoding the whole concatenated buffer at once would yield.
//!
//! The wire format defines no escaping for embedded newlines, colons, or
//! zero bytes in header values or bodies. That is a protocol limitation,
//! not a codec bug, and is preserved here.

use super::frame::Frame;
use bytes::Bytes;

/// Frame terminator on the wire.
const FRAME_TERMINATOR: u8 = 0;

/// Incremental decoder for the text protocol. One instance per connection;
/// the accumulation buffer is the only state.
#[derive(Debug, Default)]
pub struct StompCodec {
    buffer: Vec<u8>,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns a frame when `byte` completes one, `None`
    /// while more input is required.
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        if byte == FRAME_TERMINATOR {
            let frame = parse_frame(&self.buffer);
            self.buffer.clear();
            Some(frame)
        } else {
            self.buffer.push(byte);
            None
        }
    }

    /// Serialize a frame back to wire bytes: command line, `key:value`
    /// header lines in frame order, a blank line, the body, then the
    /// terminator byte.
    pub fn encode(frame: &Frame) -> Bytes {
        let mut out = String::with_capacity(64 + frame.body().len());
        out.push_str(frame.command());
        out.push('\n');
        for (key, value) in frame.headers() {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(frame.body());

        let mut bytes = out.into_bytes();
        bytes.push(FRAME_TERMINATOR);
        Bytes::from(bytes)
    }
}

/// Parse one accumulated frame body (terminator already stripped).
///
/// Line 0 is the command; subsequent lines up to the first empty line are
/// headers, each split on the first colon only; all remaining lines form
/// the body, rejoined with line breaks and trimmed of trailing whitespace.
fn parse_frame(raw: &[u8]) -> Frame {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split('\n');

    let command = lines.next().unwrap_or("").to_string();

    let mut headers = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            body_lines.push(line);
        } else if line.is_empty() {
            in_body = true;
        } else {
            let (key, value) = line.split_once(':').unwrap_or((line, ""));
            headers.push((key.to_string(), value.to_string()));
        }
    }
    let body = body_lines.join("\n").trim_end().to_string();

    Frame::from_parts(command, headers, body)
}
