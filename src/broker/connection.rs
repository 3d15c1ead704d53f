//! Per-connection plumbing shared between the reactor and the worker lanes.
//!
//! Only the control thread may touch a socket's readiness interest, so
//! anything a lane wants changed (write interest after queuing output,
//! closing a terminated connection) travels as a [`ReactorCommand`] through
//! a channel, followed by a poll wakeup. Lanes never mutate reactor state
//! directly.

use crate::broker::engine::StompEngine;
use crate::broker::registry::FrameSink;
use crate::protocol::{ConnectionId, Frame, StompCodec};
use bytes::Bytes;
use crossbeam_channel::Sender;
use mio::Waker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Interest/lifecycle change requests executed on the control thread.
#[derive(Debug, Clone, Copy)]
pub enum ReactorCommand {
    /// Enable write interest for a connection whose outbound queue became
    /// non-empty.
    EnableWrite(ConnectionId),
    /// Tear the connection down (protocol-requested termination).
    Close(ConnectionId),
    /// Stop the reactor loop.
    Shutdown,
}

/// Cross-thread path into the reactor: queue a command, wake the poll.
#[derive(Clone)]
pub struct ReactorNotifier {
    commands: Sender<ReactorCommand>,
    waker: Arc<Waker>,
}

impl ReactorNotifier {
    pub fn new(commands: Sender<ReactorCommand>, waker: Arc<Waker>) -> Self {
        Self { commands, waker }
    }

    pub fn notify(&self, command: ReactorCommand) {
        // Failure on either side means the reactor is already gone.
        let _ = self.commands.send(command);
        let _ = self.waker.wake();
    }
}

/// Outbound send capability for one connection, registered with the
/// registry. Encodes the frame, appends the bytes to the connection's FIFO
/// write queue, and asks the control thread to enable write interest.
pub struct ConnectionHandle {
    id: ConnectionId,
    write_queue: Arc<Mutex<VecDeque<Bytes>>>,
    notifier: ReactorNotifier,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        write_queue: Arc<Mutex<VecDeque<Bytes>>>,
        notifier: ReactorNotifier,
    ) -> Self {
        Self {
            id,
            write_queue,
            notifier,
        }
    }
}

impl FrameSink for ConnectionHandle {
    fn send_frame(&self, frame: Frame) {
        let bytes = StompCodec::encode(&frame);
        self.write_queue.lock().push_back(bytes);
        self.notifier.notify(ReactorCommand::EnableWrite(self.id));
    }
}

/// Decode state for one connection: its codec instance and protocol engine.
///
/// Lives behind a mutex that only this connection's lane ever locks, so
/// the lock is uncontended; lane affinity is what serializes access.
pub struct ConnectionProtocol {
    codec: StompCodec,
    engine: StompEngine,
}

impl ConnectionProtocol {
    pub fn new(engine: StompEngine) -> Self {
        Self {
            codec: StompCodec::new(),
            engine,
        }
    }

    /// Feed a chunk of raw bytes through the codec, processing every
    /// completed frame. Returns `true` once the engine wants the connection
    /// torn down.
    pub fn accept_bytes(&mut self, bytes: &[u8]) -> bool {
        for &byte in bytes {
            if let Some(frame) = self.codec.feed(byte) {
                self.engine.process(frame);
            }
        }
        self.engine.should_terminate()
    }
}
