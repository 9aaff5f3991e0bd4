//! Error types for driver operations.

use skiff_id::{AgentId, FrameworkId, OfferId};
use skiff_protocol::{ProtocolError, TransportError};
use thiserror::Error;

use crate::connection::DriverState;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Conditions reported by the driver.
///
/// Operation-level conditions are never fatal to the driver; only the
/// registration failures at the bottom end it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    // -------------------------------------------------------------------------
    // State violations
    // -------------------------------------------------------------------------
    /// The driver is not registered with a master.
    #[error("not connected to master (state: {state})")]
    NotConnected { state: DriverState },

    /// The driver has been stopped.
    #[error("driver stopped")]
    Stopped,

    /// `start` was called more than once.
    #[error("driver already started (state: {state})")]
    AlreadyStarted { state: DriverState },

    // -------------------------------------------------------------------------
    // Protocol violations
    // -------------------------------------------------------------------------
    /// The offer was never seen, or was already consumed, rescinded or expired.
    #[error("unknown or invalid offer: {0}")]
    UnknownOffer(OfferId),

    /// Offers (or tasks) in one call reference different agents.
    #[error("agent mismatch: expected {expected}, got {actual}")]
    AgentMismatch { expected: AgentId, actual: AgentId },

    /// The tasks need more than the aggregated offers provide.
    #[error("insufficient resources: requested {requested}, offered {offered}")]
    InsufficientResources { requested: String, offered: String },

    /// A task or resource definition is malformed.
    #[error("invalid task: {0}")]
    InvalidTask(#[from] ProtocolError),

    /// Malformed call arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------
    /// The transport failed to accept the message.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // -------------------------------------------------------------------------
    // Fatal
    // -------------------------------------------------------------------------
    /// The master refused the framework.
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    /// No registration acknowledgment after the configured number of attempts.
    #[error("registration failed after {attempts} attempts")]
    RegistrationExhausted { attempts: u32 },

    /// The master acknowledged registration under a different framework ID.
    #[error("framework id changed from {held} to {received}")]
    FrameworkIdChanged {
        held: FrameworkId,
        received: FrameworkId,
    },
}

impl DriverError {
    /// Operation invoked in a state that does not permit it.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            DriverError::NotConnected { .. }
                | DriverError::Stopped
                | DriverError::AlreadyStarted { .. }
        )
    }

    /// Operation referencing invalid offers or malformed arguments. The call
    /// had no side effects.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            DriverError::UnknownOffer(_)
                | DriverError::AgentMismatch { .. }
                | DriverError::InsufficientResources { .. }
                | DriverError::InvalidTask(_)
                | DriverError::InvalidArgument(_)
        )
    }

    /// Failure that ended the driver.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::RegistrationRejected(_)
                | DriverError::RegistrationExhausted { .. }
                | DriverError::FrameworkIdChanged { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_connected = DriverError::NotConnected {
            state: DriverState::Disconnected,
        };
        assert!(not_connected.is_state_violation());
        assert!(!not_connected.is_protocol_violation());

        let unknown = DriverError::UnknownOffer(OfferId::parse("o1").unwrap());
        assert!(unknown.is_protocol_violation());
        assert!(!unknown.is_state_violation());

        let exhausted = DriverError::RegistrationExhausted { attempts: 3 };
        assert!(exhausted.is_fatal());
        assert!(!exhausted.is_protocol_violation());
    }

    #[test]
    fn test_error_display() {
        let err = DriverError::NotConnected {
            state: DriverState::Registering,
        };
        assert_eq!(err.to_string(), "not connected to master (state: registering)");
    }
}
