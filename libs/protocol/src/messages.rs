//! Outbound calls and inbound events.

use serde::{Deserialize, Serialize};
use skiff_id::{AgentId, FrameworkId, OfferId, StatusUuid, TaskId};

use crate::types::{Filters, FrameworkInfo, MasterInfo, Offer, ReconcileTask, TaskInfo, TaskStatus};

// =============================================================================
// Outbound
// =============================================================================

/// A message from the driver to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Call {
    /// First registration; the master assigns a framework ID.
    Register { framework: FrameworkInfo },

    /// Registration of a framework that already holds an ID (failover).
    Reregister { framework: FrameworkInfo },

    /// Launch tasks on one or more offers from the same agent.
    Launch {
        framework_id: FrameworkId,
        offer_ids: Vec<OfferId>,
        tasks: Vec<TaskInfo>,
        filters: Filters,
    },

    /// Best-effort kill of a task.
    Kill {
        framework_id: FrameworkId,
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },

    /// Decline offers in their entirety.
    Decline {
        framework_id: FrameworkId,
        offer_ids: Vec<OfferId>,
        filters: Filters,
    },

    /// Remove all filters previously set by the framework.
    Revive { framework_id: FrameworkId },

    /// Ask for the latest status of the given tasks (all known tasks if empty).
    Reconcile {
        framework_id: FrameworkId,
        tasks: Vec<ReconcileTask>,
    },

    /// Acknowledge a reliable status update.
    Acknowledge {
        framework_id: FrameworkId,
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        uuid: StatusUuid,
    },
}

impl Call {
    /// Short name of the call, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Call::Register { .. } => "register",
            Call::Reregister { .. } => "reregister",
            Call::Launch { .. } => "launch",
            Call::Kill { .. } => "kill",
            Call::Decline { .. } => "decline",
            Call::Revive { .. } => "revive",
            Call::Reconcile { .. } => "reconcile",
            Call::Acknowledge { .. } => "acknowledge",
        }
    }

    /// Returns true for the two registration calls.
    pub fn is_registration(&self) -> bool {
        matches!(self, Call::Register { .. } | Call::Reregister { .. })
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A message from the master to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// Registration (or re-registration) succeeded.
    Registered {
        framework_id: FrameworkId,
        master: MasterInfo,
        /// Interval at which the master promises heartbeats, if it sends them.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heartbeat_interval_secs: Option<f64>,
    },

    /// A batch of offers.
    Offers { offers: Vec<Offer> },

    /// An offer is no longer valid.
    Rescind { offer_id: OfferId },

    /// A task status update.
    Update { status: TaskStatus },

    /// Liveness signal with no payload.
    Heartbeat,

    /// The master refused or removed the framework.
    Error { message: String },
}

impl Event {
    /// Short name of the event, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Registered { .. } => "registered",
            Event::Offers { .. } => "offers",
            Event::Rescind { .. } => "rescind",
            Event::Update { .. } => "update",
            Event::Heartbeat => "heartbeat",
            Event::Error { .. } => "error",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
