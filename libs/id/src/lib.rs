//! # skiff-id
//!
//! Typed identifiers exchanged between a framework scheduler and the
//! resource-management master.
//!
//! ## Design Principles
//!
//! - IDs are opaque: the master assigns them and the driver never interprets
//!   their contents
//! - Every ID type is distinct so an `OfferId` can never be passed where a
//!   `TaskId` is expected
//! - Parsing is strict: empty, oversized, or control-character IDs are rejected
//! - IDs roundtrip through their string form and through serde
//!
//! Status update UUIDs are also modelled as an opaque ID (`StatusUuid`); the
//! driver only compares them for equality.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use macros::MAX_ID_LEN;
pub use types::*;
