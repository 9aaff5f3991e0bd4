//! Core data model shared by the driver and the framework.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiff_id::{AgentId, ExecutorId, FrameworkId, OfferId, StatusUuid, TaskId};

use crate::error::ProtocolError;
use crate::resources::Resource;

// =============================================================================
// Framework and Master
// =============================================================================

/// Description of the framework sent when registering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// Set after the first successful registration, or supplied up front to
    /// fail over a framework that ran in a previous process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FrameworkId>,
    pub name: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Seconds the master waits for the framework to fail over before
    /// tearing its tasks down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_timeout_secs: Option<f64>,
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Default for FrameworkInfo {
    fn default() -> Self {
        Self {
            id: None,
            name: "skiff-framework".to_string(),
            user: "root".to_string(),
            role: None,
            failover_timeout_secs: None,
            checkpoint: false,
            hostname: None,
        }
    }
}

/// Identity and address of the master the driver is talking to.
///
/// Replaced wholesale on failover, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterInfo {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl MasterInfo {
    /// `hostname:port` form, used in logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

// =============================================================================
// Offers
// =============================================================================

/// A grant of resources from exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Constraints applied to resources the framework declines or leaves unused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// How long the master should refrain from re-offering the resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refuse_seconds: Option<f64>,
}

impl Filters {
    /// Filters that refuse the resources for the given number of seconds.
    pub fn refuse_for(seconds: f64) -> Self {
        Self {
            refuse_seconds: Some(seconds),
        }
    }

    /// Returns true if these filters suppress future offers.
    pub fn is_refusing(&self) -> bool {
        self.refuse_seconds.is_some_and(|s| s > 0.0)
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Command a task's executor runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub value: String,
    #[serde(default = "default_shell")]
    pub shell: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

fn default_shell() -> bool {
    true
}

impl CommandInfo {
    /// A shell command.
    pub fn shell(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            shell: true,
            arguments: Vec::new(),
            environment: BTreeMap::new(),
        }
    }
}

/// Task description supplied by the framework at launch time.
///
/// Once passed to `LaunchTasks` the driver owns it; the framework keeps no
/// handle through which it could be mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub agent_id: AgentId,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl TaskInfo {
    /// Checks the task is self-consistent.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.name.trim().is_empty() {
            return Err(ProtocolError::InvalidTask {
                task_id: self.task_id.to_string(),
                reason: "name is empty".to_string(),
            });
        }

        if self.command.is_none() && self.executor_id.is_none() {
            return Err(ProtocolError::InvalidTask {
                task_id: self.task_id.to_string(),
                reason: "either a command or an executor is required".to_string(),
            });
        }

        for resource in &self.resources {
            resource.validate()?;
        }

        Ok(())
    }
}

/// Task state as reported by agents and the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Killing,
    Finished,
    Failed,
    Killed,
    Error,
    Lost,
    Dropped,
    Unreachable,
    Gone,
    GoneByOperator,
    Unknown,
}

impl TaskState {
    /// Returns true if no further updates will follow this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished
                | Self::Failed
                | Self::Killed
                | Self::Error
                | Self::Lost
                | Self::Dropped
                | Self::Gone
                | Self::GoneByOperator
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Staging => "TASK_STAGING",
            TaskState::Starting => "TASK_STARTING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Killing => "TASK_KILLING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Error => "TASK_ERROR",
            TaskState::Lost => "TASK_LOST",
            TaskState::Dropped => "TASK_DROPPED",
            TaskState::Unreachable => "TASK_UNREACHABLE",
            TaskState::Gone => "TASK_GONE",
            TaskState::GoneByOperator => "TASK_GONE_BY_OPERATOR",
            TaskState::Unknown => "TASK_UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Status of a task at a point in time.
///
/// Updates carrying a `uuid` are reliable: the agent retransmits them until
/// the framework acknowledges. Updates without one are notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<StatusUuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskStatus {
    /// A bare status with no agent, UUID or message.
    pub fn new(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            agent_id: None,
            uuid: None,
            message: None,
            reason: None,
            timestamp: None,
        }
    }

    /// Returns true if this update must be acknowledged.
    pub fn requires_ack(&self) -> bool {
        self.uuid.is_some()
    }
}

/// A task the framework asks the master to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileTask {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

impl From<TaskId> for ReconcileTask {
    fn from(task_id: TaskId) -> Self {
        Self {
            task_id,
            agent_id: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_terminal() {
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Lost.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Staging.is_terminal());
        // Unreachable tasks may come back.
        assert!(!TaskState::Unreachable.is_terminal());
    }

    #[test]
    fn test_task_state_serialization() {
        let json = serde_json::to_string(&TaskState::GoneByOperator).unwrap();
        assert_eq!(json, "\"GONE_BY_OPERATOR\"");
        assert_eq!(TaskState::Running.to_string(), "TASK_RUNNING");
    }

    #[test]
    fn test_status_requires_ack() {
        let mut status = TaskStatus::new(TaskId::parse("t1").unwrap(), TaskState::Running);
        assert!(!status.requires_ack());
        status.uuid = Some(StatusUuid::parse("u1").unwrap());
        assert!(status.requires_ack());
    }

    #[test]
    fn test_filters_refusing() {
        assert!(!Filters::default().is_refusing());
        assert!(!Filters::refuse_for(0.0).is_refusing());
        assert!(Filters::refuse_for(5.0).is_refusing());
    }

    #[test]
    fn test_task_validate_requires_command_or_executor() {
        let task = TaskInfo {
            task_id: TaskId::parse("t1").unwrap(),
            name: "sleep".to_string(),
            agent_id: AgentId::parse("a1").unwrap(),
            resources: vec![],
            executor_id: None,
            command: None,
            labels: BTreeMap::new(),
        };
        assert!(matches!(
            task.validate(),
            Err(ProtocolError::InvalidTask { .. })
        ));

        let task = TaskInfo {
            command: Some(CommandInfo::shell("sleep 1")),
            ..task
        };
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_framework_info_omits_unset_id() {
        let info = FrameworkInfo::default();
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["name"], "skiff-framework");
    }
}
