//! Error types for protocol data validation.

use thiserror::Error;

/// Errors raised when protocol data is malformed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// A resource carries a negative or non-finite scalar.
    #[error("invalid scalar for resource '{name}': {value}")]
    InvalidScalar { name: String, value: f64 },

    /// A range resource has `begin > end`.
    #[error("invalid range for resource '{name}': [{begin}-{end}]")]
    InvalidRange { name: String, begin: u64, end: u64 },

    /// A task definition is missing a required field.
    #[error("invalid task '{task_id}': {reason}")]
    InvalidTask { task_id: String, reason: String },
}
