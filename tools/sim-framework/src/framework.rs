//! Sample framework: runs a fixed number of tasks to completion.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use skiff_driver::{Scheduler, SchedulerDriver};
use skiff_id::{FrameworkId, OfferId, TaskId};
use skiff_protocol::{
    CommandInfo, Filters, MasterInfo, Offer, ReconcileTask, Resource, Resources, TaskInfo,
    TaskState, TaskStatus,
};
use tracing::{debug, error, info, warn};

use crate::config::SimConfig;

/// Seconds an agent is filtered after a decline.
const DECLINE_REFUSE_SECS: f64 = 30.0;

pub struct SampleFramework {
    task_cpus: f64,
    task_mem: f64,

    /// Task numbers waiting for an offer.
    queue: BTreeSet<usize>,
    running: HashMap<TaskId, usize>,
    finished: usize,
    total: usize,
    registrations: usize,
}

impl SampleFramework {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            task_cpus: config.task_cpus,
            task_mem: config.task_mem,
            queue: (0..config.tasks).collect(),
            running: HashMap::new(),
            finished: 0,
            total: config.tasks,
            registrations: 0,
        }
    }

    fn build_tasks(&mut self, offer: &Offer) -> Vec<TaskInfo> {
        let Ok(offered) = Resources::sum(&offer.resources) else {
            warn!(offer_id = %offer.id, "Offer carries invalid resources");
            return Vec::new();
        };
        let mut cpus = offered.scalar("cpus");
        let mut mem = offered.scalar("mem");

        let mut tasks = Vec::new();
        while cpus >= self.task_cpus && mem >= self.task_mem {
            let Some(n) = self.queue.pop_first() else {
                break;
            };
            let Ok(task_id) = TaskId::parse(&format!("task-{n}")) else {
                continue;
            };
            cpus -= self.task_cpus;
            mem -= self.task_mem;

            self.running.insert(task_id.clone(), n);
            tasks.push(TaskInfo {
                task_id,
                name: format!("sample-{n}"),
                agent_id: offer.agent_id.clone(),
                resources: vec![
                    Resource::scalar("cpus", self.task_cpus),
                    Resource::scalar("mem", self.task_mem),
                ],
                executor_id: None,
                command: Some(CommandInfo::shell(format!("echo task {n}; sleep 1"))),
                labels: Default::default(),
            });
        }
        tasks
    }
}

#[async_trait]
impl Scheduler for SampleFramework {
    async fn registered(
        &mut self,
        driver: &dyn SchedulerDriver,
        framework_id: &FrameworkId,
        master: &MasterInfo,
    ) {
        self.registrations += 1;
        info!(
            framework_id = %framework_id,
            master = %master.address(),
            registrations = self.registrations,
            "Sample framework registered"
        );

        // After failover, ask for the state of everything that was running
        if self.registrations > 1 && !self.running.is_empty() {
            let tasks = self.running.keys().cloned().map(ReconcileTask::from).collect();
            if let Err(err) = driver.reconcile_tasks(tasks).await {
                warn!(error = %err, "Reconciliation request failed");
            }
        }
    }

    async fn resource_offers(&mut self, driver: &dyn SchedulerDriver, offers: &[Offer]) {
        for offer in offers {
            let tasks = self.build_tasks(offer);
            if tasks.is_empty() {
                let filters = Filters::refuse_for(DECLINE_REFUSE_SECS);
                if let Err(err) = driver.decline_offer(&offer.id, filters).await {
                    warn!(offer_id = %offer.id, error = %err, "Decline failed");
                }
                continue;
            }

            let launched: Vec<TaskId> = tasks.iter().map(|t| t.task_id.clone()).collect();
            if let Err(err) = driver
                .launch_tasks(std::slice::from_ref(&offer.id), tasks, Filters::default())
                .await
            {
                warn!(offer_id = %offer.id, error = %err, "Launch failed, requeueing tasks");
                for task_id in launched {
                    if let Some(n) = self.running.remove(&task_id) {
                        self.queue.insert(n);
                    }
                }
            }
        }
    }

    async fn offer_rescinded(&mut self, _driver: &dyn SchedulerDriver, offer_id: &OfferId) {
        debug!(offer_id = %offer_id, "Offer rescinded");
    }

    async fn status_update(&mut self, driver: &dyn SchedulerDriver, status: &TaskStatus) {
        info!(
            task_id = %status.task_id,
            state = %status.state,
            reliable = status.requires_ack(),
            "Task status"
        );

        if status.state.is_terminal() {
            if let Some(n) = self.running.remove(&status.task_id) {
                match status.state {
                    TaskState::Finished => self.finished += 1,
                    _ => {
                        warn!(task_id = %status.task_id, state = %status.state, "Task failed, requeueing");
                        self.queue.insert(n);
                        if let Err(err) = driver.revive_offers().await {
                            warn!(error = %err, "Revive failed");
                        }
                    }
                }
            }
        }

        if let Err(err) = driver.acknowledge(status).await {
            warn!(task_id = %status.task_id, error = %err, "Acknowledgment failed");
        }

        if self.finished >= self.total {
            info!(finished = self.finished, "All tasks finished, stopping");
            driver.stop().await;
        }
    }

    async fn error(&mut self, _driver: &dyn SchedulerDriver, message: &str) {
        error!(message = %message, "Scheduler driver failed");
    }
}
