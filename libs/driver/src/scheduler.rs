//! The two capability sets exchanged between framework and driver.
//!
//! A framework implements [`Scheduler`] and hands it to the driver at
//! construction. The driver implements [`SchedulerDriver`] and passes a
//! reference to itself into every callback, so the scheduler never needs to
//! store one.

use async_trait::async_trait;
use skiff_id::{AgentId, FrameworkId, OfferId, TaskId};
use skiff_protocol::{Filters, MasterInfo, Offer, ReconcileTask, TaskInfo, TaskStatus};

use crate::connection::DriverState;
use crate::error::DriverResult;

/// Callbacks invoked by the driver.
///
/// Callbacks run one at a time, in the order the driver received the
/// underlying messages, on a single delivery task. Hence `&mut self`: no
/// internal synchronization is needed across callbacks.
#[async_trait]
pub trait Scheduler: Send + 'static {
    /// The driver registered (or re-registered) with a master.
    ///
    /// Invoked exactly once per registration cycle. `framework_id` is the
    /// same on every invocation.
    async fn registered(
        &mut self,
        driver: &dyn SchedulerDriver,
        framework_id: &FrameworkId,
        master: &MasterInfo,
    );

    /// The master sent a heartbeat.
    async fn heartbeated(&mut self, _driver: &dyn SchedulerDriver) {}

    /// New offers arrived. Every offer in the batch stays usable until it is
    /// launched on, declined, or rescinded.
    async fn resource_offers(&mut self, driver: &dyn SchedulerDriver, offers: &[Offer]);

    /// An offer is no longer valid.
    async fn offer_rescinded(&mut self, driver: &dyn SchedulerDriver, offer_id: &OfferId);

    /// A task changed state.
    ///
    /// Updates carrying a UUID must be acknowledged explicitly with
    /// [`SchedulerDriver::acknowledge`]; the driver never acknowledges on its
    /// own. Retransmitted updates are delivered again.
    async fn status_update(&mut self, driver: &dyn SchedulerDriver, status: &TaskStatus);

    /// The driver hit a fatal error and is stopping.
    async fn error(&mut self, _driver: &dyn SchedulerDriver, _message: &str) {}
}

/// Operations a framework can invoke on the driver.
///
/// All operations except `start`, `join` and `run` return without waiting for
/// the master. Operations other than `kill_task` and `acknowledge` fail with a
/// state violation unless the driver is registered; those two are silently
/// dropped while disconnected.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Current registration state.
    fn state(&self) -> DriverState;

    /// Register with the master and wait until registration succeeds or
    /// fails fatally.
    async fn start(&self) -> DriverResult<DriverState>;

    /// Stop the driver. Idempotent.
    async fn stop(&self) -> DriverState;

    /// Wait until the driver stops. Returns the fatal error if one ended it.
    ///
    /// Must not be awaited from inside a callback.
    async fn join(&self) -> DriverResult<DriverState>;

    /// `start` followed by `join`.
    async fn run(&self) -> DriverResult<DriverState>;

    /// Launch tasks on offers from one agent. Unused resources are declined
    /// with `filters`; an empty task list declines the offers in full.
    async fn launch_tasks(
        &self,
        offer_ids: &[OfferId],
        tasks: Vec<TaskInfo>,
        filters: Filters,
    ) -> DriverResult<()>;

    /// Best-effort kill. Dropped while disconnected.
    async fn kill_task(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> DriverResult<()>;

    /// Decline an offer in its entirety.
    async fn decline_offer(&self, offer_id: &OfferId, filters: Filters) -> DriverResult<()>;

    /// Clear all filters previously set by the framework.
    async fn revive_offers(&self) -> DriverResult<()>;

    /// Ask the master for the latest status of `tasks` (all known tasks if
    /// empty). Replies arrive as ordinary status updates.
    async fn reconcile_tasks(&self, tasks: Vec<ReconcileTask>) -> DriverResult<()>;

    /// Acknowledge a status update. A no-op for updates without a UUID and
    /// for updates already acknowledged.
    async fn acknowledge(&self, status: &TaskStatus) -> DriverResult<()>;
}
