//! # stompmq
//!
//! A STOMP-style text-protocol message broker written in Rust: clients
//! connect over TCP, log in, subscribe to topics, and publish messages that
//! fan out to every subscriber of the destination.
//!
//! ## Architecture
//!
//! - [`protocol`] - frame model and the stateful frame codec
//! - [`broker`] - shared registry, per-connection protocol engine, and the
//!   single-threaded readiness reactor with its worker lanes
//! - [`config`] - broker configuration
//!
//! One control thread multiplexes socket readiness for every connection;
//! all decode and protocol work runs on a fixed pool of worker lanes, each
//! connection pinned to one lane so its frames are processed strictly in
//! arrival order while unrelated connections proceed in parallel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stompmq::{BrokerConfig, ReactorServer};
//!
//! fn main() -> stompmq::Result<()> {
//!     let config = BrokerConfig {
//!         port: 7777,
//!         ..Default::default()
//!     };
//!     let server = ReactorServer::bind(config)?;
//!     server.run()
//! }
//! ```

pub mod broker;
pub mod config;
pub mod protocol;

pub use broker::{FrameSink, ReactorHandle, ReactorServer, Registry, StompEngine, WorkerPool};
pub use config::BrokerConfig;
pub use protocol::{Command, ConnectionId, Frame, StompCodec, SubscriptionId};

use thiserror::Error;

/// stompmq error types.
///
/// Transport faults tear the connection down; protocol violations are
/// reported to the offending client as ERROR frames and never surface
/// here. This enum covers the faults the server itself can hit.
#[derive(Debug, Error)]
pub enum StompmqError {
    /// Transport and polling failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation and parsing errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// General protocol processing errors.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias used throughout stompmq.
pub type Result<T> = std::result::Result<T, StompmqError>;
