//! Pending-acknowledgment ledger.
//!
//! An entry exists for a status UUID from the moment its update is first
//! delivered to the framework until the framework acknowledges it (or the
//! driver stops). Retransmissions of the same UUID are delivered again but
//! never create a second entry, so at most one acknowledgment is sent.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use skiff_id::{AgentId, StatusUuid, TaskId};
use skiff_protocol::{TaskState, TaskStatus};

/// An update delivered to the framework but not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAck {
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    pub uuid: StatusUuid,
    pub state: TaskState,
    pub received_at: DateTime<Utc>,

    /// How many times this update has been delivered.
    pub deliveries: u32,
}

/// How an inbound status relates to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// No UUID; nothing to acknowledge.
    Untracked,
    /// First receipt of this UUID; an entry was created.
    New,
    /// The UUID already has an entry.
    Retransmission { deliveries: u32 },
}

/// Ledger of status updates awaiting acknowledgment, keyed by UUID.
#[derive(Debug, Default)]
pub struct AckLedger {
    entries: HashMap<StatusUuid, PendingAck>,
}

impl AckLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound status about to be delivered.
    pub fn record(&mut self, status: &TaskStatus, now: DateTime<Utc>) -> Receipt {
        let Some(uuid) = &status.uuid else {
            return Receipt::Untracked;
        };

        if let Some(entry) = self.entries.get_mut(uuid) {
            entry.deliveries += 1;
            return Receipt::Retransmission {
                deliveries: entry.deliveries,
            };
        }

        self.entries.insert(
            uuid.clone(),
            PendingAck {
                task_id: status.task_id.clone(),
                agent_id: status.agent_id.clone(),
                uuid: uuid.clone(),
                state: status.state,
                received_at: now,
                deliveries: 1,
            },
        );
        Receipt::New
    }

    pub fn get(&self, uuid: &StatusUuid) -> Option<&PendingAck> {
        self.entries.get(uuid)
    }

    /// Remove an entry once its acknowledgment has been sent.
    pub fn remove(&mut self, uuid: &StatusUuid) -> Option<PendingAck> {
        self.entries.remove(uuid)
    }

    /// Drop every entry. Returns how many were pending.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All pending entries, oldest first.
    pub fn pending(&self) -> Vec<PendingAck> {
        let mut entries: Vec<PendingAck> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        entries
    }
}

// =============================================================================
// Tests
// =============================================================================
