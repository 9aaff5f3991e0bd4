//! Typed ID definitions for the scheduler protocol.
//!
//! All IDs except `StatusUuid` are assigned by the master or chosen by the
//! framework; the driver treats them as opaque.

use crate::define_id;

// =============================================================================
// Framework and Master
// =============================================================================

define_id!(FrameworkId, "framework id");

// =============================================================================
// Offers and Agents
// =============================================================================

define_id!(OfferId, "offer id");
define_id!(AgentId, "agent id");

// =============================================================================
// Tasks
// =============================================================================

define_id!(TaskId, "task id");
define_id!(ExecutorId, "executor id");

// =============================================================================
// Status Updates
// =============================================================================

define_id!(StatusUuid, "status uuid");

impl StatusUuid {
    /// Generates a fresh random UUID in hyphenated form.
    ///
    /// Agents (and simulated masters) use this to stamp reliable updates.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
