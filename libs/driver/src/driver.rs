//! Driver facade.
//!
//! `Driver` is the handle a framework holds. It owns the connection state
//! machine, the offer tracker and the acknowledgment ledger behind one lock,
//! and spawns the callback dispatcher on `start`.
//!
//! Every operation validates, sends and then mutates while holding the lock,
//! so a rejected or unsent operation leaves no trace.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use skiff_id::{AgentId, FrameworkId, OfferId, TaskId};
use skiff_protocol::{
    Call, Event, Filters, Inbound, MasterInfo, ReconcileTask, TaskInfo, TaskStatus, Transport,
    TransportError,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::connection::{Connection, DriverState, RegistrationOutcome, RetryDecision};
use crate::dispatcher::{self, Callback};
use crate::error::{DriverError, DriverResult};
use crate::ledger::{AckLedger, PendingAck, Receipt};
use crate::offers::OfferTracker;
use crate::scheduler::{Scheduler, SchedulerDriver};

/// State guarded by the driver lock.
struct Core {
    connection: Connection,
    offers: OfferTracker,
    ledger: AckLedger,
}

struct Inner {
    config: DriverConfig,
    transport: Arc<dyn Transport>,
    core: Mutex<Core>,

    /// Taken by the dispatcher on start.
    scheduler: Mutex<Option<Box<dyn Scheduler>>>,

    /// Mirrors `Core::connection.state()` for lock-free reads and waiters.
    state_tx: watch::Sender<DriverState>,
    shutdown_tx: watch::Sender<bool>,
}

/// Scheduler driver handle. Cheap to clone.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<Inner>,
}

impl Driver {
    /// Create a driver for `scheduler` on top of `transport`.
    ///
    /// Nothing happens until [`SchedulerDriver::start`] is called.
    pub fn new<S: Scheduler>(
        scheduler: S,
        transport: Arc<dyn Transport>,
        config: DriverConfig,
    ) -> Self {
        let core = Core {
            connection: Connection::new(config.framework.clone()),
            offers: OfferTracker::new(config.offer_ttl),
            ledger: AckLedger::new(),
        };
        let scheduler: Box<dyn Scheduler> = Box::new(scheduler);
        let (state_tx, _) = watch::channel(DriverState::Unregistered);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                core: Mutex::new(core),
                scheduler: Mutex::new(Some(scheduler)),
                state_tx,
                shutdown_tx,
            }),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub async fn framework_id(&self) -> Option<FrameworkId> {
        self.inner.core.lock().await.connection.framework_id().cloned()
    }

    pub async fn master_info(&self) -> Option<MasterInfo> {
        self.inner.core.lock().await.connection.master().cloned()
    }

    /// IDs of the offers the framework may still act on, sorted.
    pub async fn outstanding_offers(&self) -> Vec<OfferId> {
        self.inner.core.lock().await.offers.offer_ids()
    }

    /// Status updates delivered but not yet acknowledged, oldest first.
    pub async fn pending_acknowledgments(&self) -> Vec<PendingAck> {
        self.inner.core.lock().await.ledger.pending()
    }

    /// The failure that stopped the driver, if any.
    pub async fn failure(&self) -> Option<DriverError> {
        self.inner.core.lock().await.connection.failure().cloned()
    }

    /// Connection epoch; incremented on every link loss.
    pub async fn epoch(&self) -> u64 {
        self.inner.core.lock().await.connection.epoch()
    }

    // =========================================================================
    // Dispatcher hooks
    // =========================================================================

    /// Apply one inbound item to driver state. Returns the callback to
    /// deliver, if any.
    pub(crate) async fn ingest(&self, inbound: Inbound) -> Option<Callback> {
        let mut core = self.inner.core.lock().await;
        if core.connection.is_stopped() {
            debug!("Dropping inbound item, driver stopped");
            return None;
        }
        let now = Instant::now();

        match inbound {
            Inbound::LinkLost { reason } => {
                if core.connection.on_link_lost(&reason) {
                    let dropped = core.offers.clear();
                    if dropped > 0 {
                        info!(dropped, "Invalidated outstanding offers after link loss");
                    }
                    self.publish(&core);
                }
                None
            }
            Inbound::LinkRestored => {
                let timeout = self.inner.config.registration_timeout;
                if let Some(call) = core.connection.on_link_restored(now, timeout) {
                    info!(epoch = core.connection.epoch(), "Link restored, re-registering");
                    self.publish(&core);
                    self.send_registration(call).await;
                }
                None
            }
            Inbound::Message(event) => self.ingest_event(&mut core, event, now).await,
        }
    }

    async fn ingest_event(
        &self,
        core: &mut Core,
        event: Event,
        now: Instant,
    ) -> Option<Callback> {
        let registered = core.connection.state() == DriverState::Registered;
        if registered {
            core.connection.record_inbound(now);
            let expired = core.offers.purge_expired(now);
            if !expired.is_empty() {
                debug!(count = expired.len(), "Purged expired offers");
            }
        }

        match event {
            Event::Registered {
                framework_id,
                master,
                heartbeat_interval_secs,
            } => {
                let heartbeat = heartbeat_interval_secs
                    .filter(|secs| *secs > 0.0)
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

                match core.connection.on_registered(
                    framework_id.clone(),
                    master.clone(),
                    heartbeat,
                    now,
                ) {
                    Ok(RegistrationOutcome::Registered) => {
                        self.publish(core);
                        Some(Callback::Registered {
                            framework_id,
                            master,
                        })
                    }
                    Ok(RegistrationOutcome::Ignored) => None,
                    Err(err) => Some(self.fail(core, err).await),
                }
            }

            Event::Error { message } => {
                Some(self.fail(core, DriverError::RegistrationRejected(message)).await)
            }

            event if !registered => {
                debug!(
                    kind = event.kind(),
                    state = %core.connection.state(),
                    "Dropping event received while not registered"
                );
                None
            }

            Event::Offers { offers } => {
                core.offers.add_batch(&offers, now);
                debug!(
                    count = offers.len(),
                    outstanding = core.offers.len(),
                    "Received offers"
                );
                Some(Callback::ResourceOffers(offers))
            }

            Event::Rescind { offer_id } => {
                // The framework hears about every rescind, held or not
                let held = core.offers.rescind(&offer_id);
                debug!(offer_id = %offer_id, held, "Offer rescinded");
                Some(Callback::OfferRescinded(offer_id))
            }

            Event::Update { status } => {
                match core.ledger.record(&status, Utc::now()) {
                    Receipt::Retransmission { deliveries } => debug!(
                        task_id = %status.task_id,
                        state = %status.state,
                        deliveries,
                        "Status update retransmitted"
                    ),
                    _ => debug!(
                        task_id = %status.task_id,
                        state = %status.state,
                        "Status update received"
                    ),
                }
                Some(Callback::StatusUpdate(status))
            }

            Event::Heartbeat => Some(Callback::Heartbeated),
        }
    }

    /// Handle registration retries and the heartbeat watchdog.
    pub(crate) async fn on_timer(&self) -> Option<Callback> {
        let mut core = self.inner.core.lock().await;
        if core.connection.is_stopped() {
            return None;
        }
        let now = Instant::now();

        match core.connection.on_retry_timer(now, &self.inner.config) {
            RetryDecision::Resend(call) => self.send_registration(call).await,
            RetryDecision::Exhausted { attempts } => {
                let err = DriverError::RegistrationExhausted { attempts };
                return Some(self.fail(&mut core, err).await);
            }
            RetryDecision::Idle => {}
        }

        let max_missed = self.inner.config.max_missed_heartbeats;
        if core.connection.heartbeat_expired(now, max_missed) {
            warn!(max_missed, "Master stopped sending heartbeats");
            if core.connection.on_link_lost("heartbeat timeout") {
                core.offers.clear();
                self.publish(&core);
            }
            drop(core);
            self.inner.transport.reconnect("heartbeat timeout").await;
        }

        None
    }

    /// The earliest instant the dispatcher must wake up for `on_timer`.
    pub(crate) async fn next_deadline(&self) -> Option<Instant> {
        let core = self.inner.core.lock().await;
        core.connection
            .next_deadline(self.inner.config.max_missed_heartbeats)
    }

    /// The transport dropped the inbound queue without being closed.
    pub(crate) async fn on_inbound_closed(&self) -> Option<Callback> {
        let mut core = self.inner.core.lock().await;
        if core.connection.is_stopped() {
            return None;
        }
        Some(
            self.fail(&mut core, DriverError::Transport(TransportError::Closed))
                .await,
        )
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn publish(&self, core: &Core) {
        self.inner.state_tx.send_replace(core.connection.state());
    }

    /// Stop with a fatal error and build the error callback.
    async fn fail(&self, core: &mut Core, err: DriverError) -> Callback {
        error!(error = %err, "Driver failed");
        let message = err.to_string();
        if self.stop_locked(core, Some(err)) {
            self.inner.transport.close().await;
        }
        Callback::Error(message)
    }

    /// Transition to `Stopped` and release everything the driver holds.
    fn stop_locked(&self, core: &mut Core, failure: Option<DriverError>) -> bool {
        if !core.connection.stop(failure) {
            return false;
        }
        let offers = core.offers.clear();
        let acks = core.ledger.clear();
        self.publish(core);
        self.inner.shutdown_tx.send_replace(true);

        info!(
            dropped_offers = offers,
            dropped_acks = acks,
            "Driver stopped"
        );
        true
    }

    /// Registration sends are retried by the timer, so failures only log.
    async fn send_registration(&self, call: Call) {
        let kind = call.kind();
        if let Err(err) = self.inner.transport.send(call).await {
            warn!(call = kind, error = %err, "Failed to send registration, will retry");
        }
    }

    async fn send(&self, call: Call) -> DriverResult<()> {
        let kind = call.kind();
        self.inner.transport.send(call).await.map_err(|err| {
            warn!(call = kind, error = %err, "Failed to send call");
            DriverError::Transport(err)
        })
    }

    /// Send a call that is dropped rather than failed when the link is down.
    /// Returns false if it was dropped.
    async fn send_unreliable(&self, call: Call) -> DriverResult<bool> {
        let kind = call.kind();
        match self.inner.transport.send(call).await {
            Ok(()) => Ok(true),
            Err(TransportError::NotConnected) => {
                debug!(call = kind, "Dropping call, link is down");
                Ok(false)
            }
            Err(err) => {
                warn!(call = kind, error = %err, "Failed to send call");
                Err(DriverError::Transport(err))
            }
        }
    }

    /// Wait for the published state to satisfy `done`, or for the driver to
    /// stop.
    async fn wait_for(
        &self,
        mut state_rx: watch::Receiver<DriverState>,
        done: impl Fn(DriverState) -> bool,
    ) -> DriverResult<DriverState> {
        loop {
            let state = *state_rx.borrow_and_update();
            if done(state) {
                return Ok(state);
            }
            if state == DriverState::Stopped {
                return Err(self.failure().await.unwrap_or(DriverError::Stopped));
            }
            if state_rx.changed().await.is_err() {
                return Err(DriverError::Stopped);
            }
        }
    }
}

fn rejected(operation: &'static str, err: DriverError) -> DriverError {
    warn!(operation, error = %err, "Rejected driver operation");
    err
}

// =============================================================================
// Facade
// =============================================================================

#[async_trait]
impl SchedulerDriver for Driver {
    fn state(&self) -> DriverState {
        *self.inner.state_tx.borrow()
    }

    async fn start(&self) -> DriverResult<DriverState> {
        let state_rx = self.inner.state_tx.subscribe();

        let call = {
            let mut core = self.inner.core.lock().await;
            let call = core
                .connection
                .begin(Instant::now(), self.inner.config.registration_timeout)
                .map_err(|err| rejected("start", err))?;
            self.publish(&core);
            call
        };

        let Some(scheduler) = self.inner.scheduler.lock().await.take() else {
            return Err(DriverError::AlreadyStarted {
                state: self.state(),
            });
        };

        info!(
            framework = %self.inner.config.framework.name,
            failover = self.inner.config.framework.id.is_some(),
            "Starting scheduler driver"
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        if let Err(err) = self.inner.transport.open(inbound_tx).await {
            error!(error = %err, "Failed to open transport");
            let err = DriverError::Transport(err);
            let mut core = self.inner.core.lock().await;
            self.stop_locked(&mut core, Some(err.clone()));
            return Err(err);
        }

        {
            // A stop that raced the open has already closed the transport once
            let core = self.inner.core.lock().await;
            if core.connection.is_stopped() {
                let err = core.connection.failure().cloned().unwrap_or(DriverError::Stopped);
                drop(core);
                warn!("Driver stopped while opening transport");
                self.inner.transport.close().await;
                return Err(err);
            }

            let shutdown_rx = self.inner.shutdown_tx.subscribe();
            tokio::spawn(dispatcher::run(
                self.clone(),
                scheduler,
                inbound_rx,
                shutdown_rx,
            ));

            self.send_registration(call).await;
        }

        self.wait_for(state_rx, |state| state == DriverState::Registered)
            .await
    }

    async fn stop(&self) -> DriverState {
        let stopped = {
            let mut core = self.inner.core.lock().await;
            self.stop_locked(&mut core, None)
        };
        if stopped {
            self.inner.transport.close().await;
        }
        DriverState::Stopped
    }

    async fn join(&self) -> DriverResult<DriverState> {
        let state_rx = self.inner.state_tx.subscribe();
        match self.wait_for(state_rx, |_| false).await {
            Err(DriverError::Stopped) => Ok(DriverState::Stopped),
            other => other,
        }
    }

    async fn run(&self) -> DriverResult<DriverState> {
        self.start().await?;
        self.join().await
    }

    async fn launch_tasks(
        &self,
        offer_ids: &[OfferId],
        tasks: Vec<TaskInfo>,
        filters: Filters,
    ) -> DriverResult<()> {
        let mut core = self.inner.core.lock().await;
        let framework_id = core
            .connection
            .ensure_registered()
            .map_err(|err| rejected("launch_tasks", err))?;

        let selection = core
            .offers
            .select(offer_ids, Instant::now())
            .and_then(|selection| selection.admit(&tasks).map(|_| selection))
            .map_err(|err| rejected("launch_tasks", err))?;

        let task_count = tasks.len();
        let call = if tasks.is_empty() {
            Call::Decline {
                framework_id,
                offer_ids: selection.offer_ids.clone(),
                filters,
            }
        } else {
            Call::Launch {
                framework_id,
                offer_ids: selection.offer_ids.clone(),
                tasks,
                filters,
            }
        };
        self.send(call).await?;

        core.offers.consume(&selection, &filters);
        info!(
            agent_id = %selection.agent_id,
            offers = selection.offer_ids.len(),
            tasks = task_count,
            "Launched tasks"
        );
        Ok(())
    }

    async fn kill_task(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> DriverResult<()> {
        let core = self.inner.core.lock().await;
        let framework_id = match core.connection.ensure_registered() {
            Ok(id) => id,
            Err(DriverError::Stopped) => return Err(rejected("kill_task", DriverError::Stopped)),
            Err(_) => {
                debug!(
                    task_id = %task_id,
                    state = %core.connection.state(),
                    "Dropping kill request while not registered"
                );
                return Ok(());
            }
        };

        let sent = self
            .send_unreliable(Call::Kill {
                framework_id,
                task_id: task_id.clone(),
                agent_id: agent_id.cloned(),
            })
            .await?;

        if sent {
            info!(task_id = %task_id, "Requested task kill");
        }
        Ok(())
    }

    async fn decline_offer(&self, offer_id: &OfferId, filters: Filters) -> DriverResult<()> {
        let mut core = self.inner.core.lock().await;
        let framework_id = core
            .connection
            .ensure_registered()
            .map_err(|err| rejected("decline_offer", err))?;

        let selection = core
            .offers
            .select(std::slice::from_ref(offer_id), Instant::now())
            .map_err(|err| rejected("decline_offer", err))?;

        self.send(Call::Decline {
            framework_id,
            offer_ids: selection.offer_ids.clone(),
            filters,
        })
        .await?;

        core.offers.consume(&selection, &filters);
        debug!(offer_id = %offer_id, refuse_seconds = ?filters.refuse_seconds, "Declined offer");
        Ok(())
    }

    async fn revive_offers(&self) -> DriverResult<()> {
        let mut core = self.inner.core.lock().await;
        let framework_id = core
            .connection
            .ensure_registered()
            .map_err(|err| rejected("revive_offers", err))?;

        self.send(Call::Revive { framework_id }).await?;

        let cleared = core.offers.revive();
        info!(cleared_filters = cleared, "Revived offers");
        Ok(())
    }

    async fn reconcile_tasks(&self, tasks: Vec<ReconcileTask>) -> DriverResult<()> {
        let core = self.inner.core.lock().await;
        let framework_id = core
            .connection
            .ensure_registered()
            .map_err(|err| rejected("reconcile_tasks", err))?;

        let count = tasks.len();
        self.send(Call::Reconcile {
            framework_id,
            tasks,
        })
        .await?;

        info!(tasks = count, implicit = count == 0, "Requested reconciliation");
        Ok(())
    }

    async fn acknowledge(&self, status: &TaskStatus) -> DriverResult<()> {
        let Some(uuid) = &status.uuid else {
            return Ok(());
        };

        let mut core = self.inner.core.lock().await;
        let framework_id = match core.connection.ensure_registered() {
            Ok(id) => id,
            Err(DriverError::Stopped) => return Err(rejected("acknowledge", DriverError::Stopped)),
            Err(_) => {
                debug!(
                    task_id = %status.task_id,
                    uuid = %uuid,
                    "Dropping acknowledgment while not registered"
                );
                return Ok(());
            }
        };

        let Some(entry) = core.ledger.get(uuid) else {
            debug!(task_id = %status.task_id, uuid = %uuid, "Update already acknowledged");
            return Ok(());
        };

        let sent = self
            .send_unreliable(Call::Acknowledge {
                framework_id,
                task_id: entry.task_id.clone(),
                agent_id: entry.agent_id.clone(),
                uuid: uuid.clone(),
            })
            .await?;

        // An unsent acknowledgment keeps its entry for the retransmission
        if !sent {
            return Ok(());
        }
        core.ledger.remove(uuid);
        debug!(task_id = %status.task_id, uuid = %uuid, "Acknowledged status update");
        Ok(())
    }
}
