//! # skiff-protocol
//!
//! Data model and message kinds for the scheduler side of the offer/task/status
//! protocol, plus the interface of the transport the driver sits on.
//!
//! ## Design Principles
//!
//! - Types are plain data with serde derives; no behaviour depends on a
//!   particular wire encoding
//! - Outbound messages (`Call`) and inbound messages (`Event`) are closed enums
//! - The transport is reliable and ordered per connection epoch; link loss and
//!   recovery are signalled in-band as `Inbound` items
//!
//! ## Message Kinds
//!
//! Outbound: `Register`, `Reregister`, `Launch`, `Kill`, `Decline`, `Revive`,
//! `Reconcile`, `Acknowledge`.
//!
//! Inbound: `Registered`, `Offers`, `Rescind`, `Update`, `Heartbeat`, `Error`.

mod error;
mod messages;
mod resources;
mod transport;
mod types;

pub use error::ProtocolError;
pub use messages::*;
pub use resources::*;
pub use transport::*;
pub use types::*;

pub use skiff_id::*;
