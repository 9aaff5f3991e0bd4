//! Builders for protocol values used in tests.
//!
//! Every builder panics on an invalid ID; fixtures are for tests only.

use std::collections::BTreeMap;

use chrono::Utc;
use skiff_id::{AgentId, FrameworkId, OfferId, StatusUuid, TaskId};
use skiff_protocol::{CommandInfo, Offer, Resource, TaskInfo, TaskState, TaskStatus};

pub fn offer_id(id: &str) -> OfferId {
    OfferId::parse(id).expect("valid offer id")
}

pub fn task_id(id: &str) -> TaskId {
    TaskId::parse(id).expect("valid task id")
}

pub fn agent_id(id: &str) -> AgentId {
    AgentId::parse(id).expect("valid agent id")
}

/// An offer of `cpus` and `mem` (MiB) on `agent`.
pub fn offer(id: &str, framework: &str, agent: &str, cpus: f64, mem: f64) -> Offer {
    Offer {
        id: offer_id(id),
        framework_id: FrameworkId::parse(framework).expect("valid framework id"),
        agent_id: agent_id(agent),
        hostname: format!("{agent}.sim"),
        resources: vec![Resource::scalar("cpus", cpus), Resource::scalar("mem", mem)],
        attributes: BTreeMap::new(),
    }
}

/// A shell task needing `cpus` and `mem` on `agent`.
pub fn task(id: &str, agent: &str, cpus: f64, mem: f64) -> TaskInfo {
    TaskInfo {
        task_id: task_id(id),
        name: format!("task-{id}"),
        agent_id: agent_id(agent),
        resources: vec![Resource::scalar("cpus", cpus), Resource::scalar("mem", mem)],
        executor_id: None,
        command: Some(CommandInfo::shell("sleep 10")),
        labels: BTreeMap::new(),
    }
}

/// A reliable status update carrying `uuid`.
pub fn status(task: &str, agent: &str, state: TaskState, uuid: &str) -> TaskStatus {
    TaskStatus {
        agent_id: Some(agent_id(agent)),
        uuid: Some(StatusUuid::parse(uuid).expect("valid status uuid")),
        timestamp: Some(Utc::now()),
        ..TaskStatus::new(task_id(task), state)
    }
}

/// A status update without a UUID, as sent by reconciliation.
pub fn unreliable_status(task: &str, state: TaskState) -> TaskStatus {
    TaskStatus {
        timestamp: Some(Utc::now()),
        ..TaskStatus::new(task_id(task), state)
    }
}
