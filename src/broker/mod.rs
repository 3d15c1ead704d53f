//! Broker core: shared registry, per-connection protocol engine, and the
//! reactor execution machinery.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  readable   ┌──────────────┐  frames   ┌─────────────┐
//! │ Reactor  │────────────▶│ Worker lane  │──────────▶│ StompEngine │
//! │ (1 thread)│  leased buf │ (id % lanes) │   codec   │ (per conn)  │
//! └──────────┘             └──────────────┘           └──────┬──────┘
//!       ▲  write queues + EnableWrite commands                │
//!       └──────────────────────────────────────────────┐      ▼
//!                                                 ┌────┴─────────┐
//!                                                 │   Registry   │
//!                                                 │ (shared maps)│
//!                                                 └──────────────┘
//! ```
//!
//! - [`registry`] - concurrency-safe directory of connections, topic
//!   subscriber sets, credentials, and sessions
//! - [`engine`] - per-connection command state machine
//! - [`server`] - the readiness-multiplexing control loop
//! - [`worker`] - fixed lanes giving per-connection ordering
//! - [`connection`] - write queues, reactor commands, outbound handles
//! - [`buffer`] - reusable read-buffer pool

pub mod buffer;
pub mod connection;
pub mod engine;
pub mod registry;
pub mod server;
pub mod worker;

pub use buffer::BufferPool;
pub use connection::{ConnectionHandle, ConnectionProtocol, ReactorCommand, ReactorNotifier};
pub use engine::StompEngine;
pub use registry::{FrameSink, Registry};
pub use server::{ReactorHandle, ReactorServer};
pub use worker::WorkerPool;
