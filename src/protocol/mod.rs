//! Wire protocol: frame model and the stateful frame codec.
//!
//! The protocol is a STOMP-style text format. Each frame is a command line,
//! `key:value` header lines, a blank line, a body, and a single zero byte
//! terminator:
//!
//! ```text
//! COMMAND\n
//! header-key:header-value\n
//! \n
//! body-bytes\0
//! ```
//!
//! Headers are split on the first colon only; no escaping is defined for
//! embedded newlines, colons, or zero bytes.
//!
//! ## Modules
//!
//! - [`frame`] - Frame model and server-side frame constructors
//! - [`codec`] - Incremental decoder and frame serializer

pub mod codec;
pub mod frame;


pub use codec::StompCodec;
pub use frame::{Command, ConnectionId, Frame, SubscriptionId};
