//! STOMP frame representation.
//!
//! A frame is one discrete protocol message: a command line, an ordered set
//! of `key:value` headers, and a text body. Frames are immutable once
//! constructed; server-side frames are built through the named constructors
//! below so every response carries the headers the protocol requires.

use std::fmt;

/// Identifier assigned to a connection at accept time. Monotonic, never reused.
pub type ConnectionId = u64;

/// Client-supplied subscription identifier, parsed from the `id` header.
pub type SubscriptionId = i64;

/// One decoded protocol frame.
///
/// Header order is insertion order and is preserved on encode. Duplicate
/// header keys are kept in the frame but [`Frame::header`] resolves to the
/// first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub(crate) fn from_parts(
        command: String,
        headers: Vec<(String, String)>,
        body: String,
    ) -> Self {
        Self {
            command,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// First occurrence of `key`, or `None` if the frame has no such header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// `CONNECTED` frame carrying the negotiated protocol version.
    pub fn connected(version: &str) -> Self {
        Frame::new("CONNECTED").with_header("version", version)
    }

    /// `RECEIPT` frame echoing the client's receipt id.
    pub fn receipt(receipt_id: &str) -> Self {
        Frame::new("RECEIPT").with_header("receipt-id", receipt_id)
    }

    /// `MESSAGE` frame delivered to every subscriber of a destination.
    pub fn message(
        destination: &str,
        subscription: SubscriptionId,
        user: &str,
        message_id: u64,
        body: &str,
    ) -> Self {
        Frame::new("MESSAGE")
            .with_header("destination", destination)
            .with_header("subscription", subscription.to_string())
            .with_header("user", user)
            .with_header("message-id", message_id.to_string())
            .with_body(body)
    }

    /// `ERROR` frame: `message` header carries the short reason, the body a
    /// longer human-readable description.
    pub fn error(message: &str, description: &str) -> Self {
        Frame::new("ERROR")
            .with_header("message", message)
            .with_body(description)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for (key, value) in &self.headers {
            write!(f, " {}:{}", key, value)?;
        }
        Ok(())
    }
}

/// The closed set of client commands the broker understands.
///
/// Unknown command strings deliberately have no variant here: the engine's
/// match on `Command::parse` makes the unknown-command path the explicit
/// default arm instead of a string comparison chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
}

impl Command {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CONNECT" => Some(Command::Connect),
            "SEND" => Some(Command::Send),
            "SUBSCRIBE" => Some(Command::Subscribe),
            "UNSUBSCRIBE" => Some(Command::Unsubscribe),
            "DISCONNECT" => Some(Command::Disconnect),
            _ => None,
        }
    }
}
