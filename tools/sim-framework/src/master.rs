//! Automated master behind the simulated transport.
//!
//! Answers registration, offers free agent capacity, runs launched tasks for
//! a fixed time, and sends reliable status updates that it retransmits until
//! they are acknowledged.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use skiff_id::{AgentId, FrameworkId, OfferId, StatusUuid, TaskId};
use skiff_protocol::{Call, Offer, Resource, Resources, TaskInfo, TaskState, TaskStatus};
use skiff_testing::SimMaster;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SimConfig;

/// Refusal applied when a decline carries no filter.
const DEFAULT_REFUSE: Duration = Duration::from_secs(5);

/// Unacknowledged updates are resent after this long.
const RETRANSMIT_AFTER: Duration = Duration::from_secs(3);

struct Agent {
    id: AgentId,
    free_cpus: f64,
    free_mem: f64,
    offered: Option<OfferId>,
    refused_until: Option<Instant>,
}

struct RunningTask {
    agent: usize,
    cpus: f64,
    mem: f64,
    state: TaskState,
    finish_at: Instant,

    /// Terminal state reported once `finish_at` passes.
    outcome: TaskState,
}

struct Unacked {
    status: TaskStatus,
    sent_at: Instant,
}

struct Master {
    sim: SimMaster,
    config: SimConfig,
    framework_id: Option<FrameworkId>,
    agents: Vec<Agent>,
    tasks: HashMap<TaskId, RunningTask>,
    unacked: HashMap<StatusUuid, Unacked>,
    offer_seq: u64,
    launched: usize,
    link_dropped: bool,
    started_at: Instant,
}

/// Serve the driver until shutdown.
pub async fn run_master(sim: SimMaster, config: SimConfig, mut shutdown: watch::Receiver<bool>) {
    let agents = (0..config.agents)
        .filter_map(|i| AgentId::parse(&format!("agent-{i}")).ok())
        .map(|id| Agent {
            id,
            free_cpus: config.agent_cpus,
            free_mem: config.agent_mem,
            offered: None,
            refused_until: None,
        })
        .collect();

    let mut tick = tokio::time::interval(config.heartbeat_interval());
    let mut master = Master {
        sim,
        config,
        framework_id: None,
        agents,
        tasks: HashMap::new(),
        unacked: HashMap::new(),
        offer_seq: 0,
        launched: 0,
        link_dropped: false,
        started_at: Instant::now(),
    };

    info!(agents = master.agents.len(), "Simulated master started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            call = master.sim.next_call() => {
                if let Some(call) = call {
                    master.handle(call);
                }
            }

            _ = tick.tick() => master.on_tick(),
        }
    }

    info!(
        launched = master.launched,
        unacked = master.unacked.len(),
        "Simulated master stopped"
    );
}

impl Master {
    fn handle(&mut self, call: Call) {
        debug!(call = call.kind(), "Master handling call");
        match call {
            Call::Register { framework } | Call::Reregister { framework } => {
                let framework_id = match (framework.id, &self.framework_id) {
                    (Some(id), _) => id,
                    (None, Some(id)) => id.clone(),
                    (None, None) => {
                        match FrameworkId::parse(&format!("fw-{}", uuid::Uuid::new_v4())) {
                            Ok(id) => id,
                            Err(err) => {
                                warn!(error = %err, "Failed to mint framework id");
                                return;
                            }
                        }
                    }
                };
                info!(framework_id = %framework_id, name = %framework.name, "Framework registered");

                self.framework_id = Some(framework_id.clone());
                for agent in &mut self.agents {
                    agent.offered = None;
                }
                self.sim.accept_registration(
                    framework_id.as_str(),
                    Some(self.config.heartbeat_secs),
                );
                self.send_offers();
            }

            Call::Launch {
                offer_ids, tasks, ..
            } => {
                for offer_id in &offer_ids {
                    self.take_offer(offer_id, None);
                }
                for task in tasks {
                    self.launch(task);
                }
            }

            Call::Decline {
                offer_ids, filters, ..
            } => {
                let refuse = filters
                    .refuse_seconds
                    .filter(|secs| *secs > 0.0)
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .unwrap_or(DEFAULT_REFUSE);
                for offer_id in &offer_ids {
                    self.take_offer(offer_id, Some(refuse));
                }
            }

            Call::Revive { .. } => {
                for agent in &mut self.agents {
                    agent.refused_until = None;
                }
                self.send_offers();
            }

            Call::Kill { task_id, .. } => {
                match self.tasks.get_mut(&task_id) {
                    Some(task) if !task.state.is_terminal() => {
                        task.outcome = TaskState::Killed;
                        task.finish_at = Instant::now();
                    }
                    _ => debug!(task_id = %task_id, "Kill for unknown or finished task"),
                }
            }

            Call::Reconcile { tasks, .. } => {
                let ids: Vec<TaskId> = if tasks.is_empty() {
                    self.tasks.keys().cloned().collect()
                } else {
                    tasks.into_iter().map(|t| t.task_id).collect()
                };
                for task_id in ids {
                    let state = self
                        .tasks
                        .get(&task_id)
                        .map(|t| t.state)
                        .unwrap_or(TaskState::Lost);
                    self.sim.send_update(TaskStatus {
                        message: Some("reconciliation".to_string()),
                        ..TaskStatus::new(task_id, state)
                    });
                }
            }

            Call::Acknowledge { uuid, task_id, .. } => {
                if self.unacked.remove(&uuid).is_none() {
                    warn!(task_id = %task_id, uuid = %uuid, "Acknowledgment for unknown update");
                }
            }
        }
    }

    fn take_offer(&mut self, offer_id: &OfferId, refuse: Option<Duration>) {
        let Some(agent) = self
            .agents
            .iter_mut()
            .find(|a| a.offered.as_ref() == Some(offer_id))
        else {
            warn!(offer_id = %offer_id, "Call referenced an offer the master does not hold");
            return;
        };
        agent.offered = None;
        if let Some(refuse) = refuse {
            agent.refused_until = Some(Instant::now() + refuse);
        }
    }

    fn launch(&mut self, task: TaskInfo) {
        let Some(agent_idx) = self.agents.iter().position(|a| a.id == task.agent_id) else {
            self.update(task.task_id, task.agent_id, TaskState::Error);
            return;
        };

        let Ok(requested) = Resources::sum(&task.resources) else {
            self.update(task.task_id, task.agent_id, TaskState::Error);
            return;
        };
        let cpus = requested.scalar("cpus");
        let mem = requested.scalar("mem");

        let agent = &mut self.agents[agent_idx];
        agent.free_cpus -= cpus;
        agent.free_mem -= mem;

        self.launched += 1;
        let fail = self.config.fail_every > 0
            && self.launched % self.config.fail_every == 0
            && !self.tasks.contains_key(&task.task_id);
        let outcome = if fail {
            TaskState::Failed
        } else {
            TaskState::Finished
        };

        self.tasks.insert(
            task.task_id.clone(),
            RunningTask {
                agent: agent_idx,
                cpus,
                mem,
                state: TaskState::Running,
                finish_at: Instant::now() + self.config.task_runtime(),
                outcome,
            },
        );
        self.update(task.task_id, task.agent_id, TaskState::Running);
    }

    fn on_tick(&mut self) {
        if self.framework_id.is_none() {
            return;
        }

        if let Some(after) = self.config.drop_link_after() {
            if !self.link_dropped && self.started_at.elapsed() >= after {
                warn!("Simulating master failover");
                self.link_dropped = true;
                self.sim.drop_link("simulated failover");
                for agent in &mut self.agents {
                    agent.offered = None;
                }
                self.sim.restore_link();
                return;
            }
        }

        self.sim.heartbeat();
        self.complete_due_tasks();
        self.retransmit();
        self.send_offers();
    }

    fn complete_due_tasks(&mut self) {
        let now = Instant::now();
        let due: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, t)| !t.state.is_terminal() && t.finish_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for task_id in due {
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            let state = task.outcome;
            task.state = state;

            let agent = &mut self.agents[task.agent];
            agent.free_cpus += task.cpus;
            agent.free_mem += task.mem;

            let agent_id = agent.id.clone();
            self.update(task_id, agent_id, state);
        }
    }

    fn retransmit(&mut self) {
        let now = Instant::now();
        for unacked in self.unacked.values_mut() {
            if now.duration_since(unacked.sent_at) >= RETRANSMIT_AFTER {
                debug!(task_id = %unacked.status.task_id, "Retransmitting status update");
                unacked.sent_at = now;
                self.sim.send_update(unacked.status.clone());
            }
        }
    }

    fn send_offers(&mut self) {
        let Some(framework_id) = self.framework_id.clone() else {
            return;
        };
        let now = Instant::now();
        let mut offers = Vec::new();

        for agent in &mut self.agents {
            let refused = agent.refused_until.is_some_and(|until| until > now);
            if agent.offered.is_some() || refused || agent.free_cpus < 0.01 {
                continue;
            }

            self.offer_seq += 1;
            let Ok(offer_id) = OfferId::parse(&format!("offer-{}", self.offer_seq)) else {
                continue;
            };
            agent.offered = Some(offer_id.clone());
            agent.refused_until = None;

            offers.push(Offer {
                id: offer_id,
                framework_id: framework_id.clone(),
                agent_id: agent.id.clone(),
                hostname: format!("{}.sim", agent.id),
                resources: vec![
                    Resource::scalar("cpus", agent.free_cpus),
                    Resource::scalar("mem", agent.free_mem),
                ],
                attributes: Default::default(),
            });
        }

        if !offers.is_empty() {
            debug!(count = offers.len(), "Sending offers");
            self.sim.send_offers(offers);
        }
    }

    /// Send a reliable update and remember it until acknowledged.
    fn update(&mut self, task_id: TaskId, agent_id: AgentId, state: TaskState) {
        let uuid = StatusUuid::random();
        let status = TaskStatus {
            agent_id: Some(agent_id),
            uuid: Some(uuid.clone()),
            timestamp: Some(Utc::now()),
            ..TaskStatus::new(task_id, state)
        };
        self.unacked.insert(
            uuid,
            Unacked {
                status: status.clone(),
                sent_at: Instant::now(),
            },
        );
        self.sim.send_update(status);
    }
}
