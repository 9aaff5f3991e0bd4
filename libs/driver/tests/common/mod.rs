//! Shared harness for driver integration tests.

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use skiff_driver::{Driver, DriverConfig, DriverError, DriverState, Scheduler, SchedulerDriver};
use skiff_protocol::{Call, FrameworkId, MasterInfo, Offer, OfferId, TaskState, TaskStatus};
use skiff_testing::SimMaster;
use tokio::sync::mpsc;

/// One observed callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Registered { framework_id: String, master: String },
    Heartbeat,
    Offers(Vec<String>),
    Rescinded(String),
    Update {
        task_id: String,
        state: TaskState,
        uuid: Option<String>,
    },
    Error(String),
    /// Result of an acknowledgment sent from inside `status_update`.
    Acked(Result<(), DriverError>),
    /// State observed after calling `stop` from inside a callback.
    StoppedFromCallback(DriverState),
}

/// Scheduler that reports every callback to a [`Recorder`].
pub struct RecordingScheduler {
    tx: mpsc::UnboundedSender<Record>,

    /// Acknowledge every reliable update as soon as it is delivered.
    pub auto_ack: bool,

    /// Time spent inside each callback.
    pub callback_delay: Option<Duration>,

    /// Call `stop` from inside `resource_offers`.
    pub stop_on_offers: bool,
}

pub struct Recorder {
    rx: mpsc::UnboundedReceiver<Record>,
}

impl RecordingScheduler {
    pub fn new() -> (Self, Recorder) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                auto_ack: false,
                callback_delay: None,
                stop_on_offers: false,
            },
            Recorder { rx },
        )
    }

    async fn record(&self, record: Record) {
        if let Some(delay) = self.callback_delay {
            tokio::time::sleep(delay).await;
        }
        let _ = self.tx.send(record);
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn registered(
        &mut self,
        _driver: &dyn SchedulerDriver,
        framework_id: &FrameworkId,
        master: &MasterInfo,
    ) {
        self.record(Record::Registered {
            framework_id: framework_id.to_string(),
            master: master.address(),
        })
        .await;
    }

    async fn heartbeated(&mut self, _driver: &dyn SchedulerDriver) {
        self.record(Record::Heartbeat).await;
    }

    async fn resource_offers(&mut self, driver: &dyn SchedulerDriver, offers: &[Offer]) {
        let ids = offers.iter().map(|o| o.id.to_string()).collect();
        self.record(Record::Offers(ids)).await;

        if self.stop_on_offers {
            let state = driver.stop().await;
            self.record(Record::StoppedFromCallback(state)).await;
        }
    }

    async fn offer_rescinded(&mut self, _driver: &dyn SchedulerDriver, offer_id: &OfferId) {
        self.record(Record::Rescinded(offer_id.to_string())).await;
    }

    async fn status_update(&mut self, driver: &dyn SchedulerDriver, status: &TaskStatus) {
        self.record(Record::Update {
            task_id: status.task_id.to_string(),
            state: status.state,
            uuid: status.uuid.as_ref().map(|u| u.to_string()),
        })
        .await;

        if self.auto_ack {
            let result = driver.acknowledge(status).await;
            self.record(Record::Acked(result)).await;
        }
    }

    async fn error(&mut self, _driver: &dyn SchedulerDriver, message: &str) {
        self.record(Record::Error(message.to_string())).await;
    }
}

impl Recorder {
    /// The next callback. Panics if none arrives within five seconds.
    pub async fn next(&mut self) -> Record {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("scheduler dropped")
    }

    /// Asserts that no callback arrives for a while.
    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(record)) =
            tokio::time::timeout(Duration::from_millis(200), self.rx.recv()).await
        {
            panic!("unexpected callback: {record:?}");
        }
    }
}

/// A driver wired to a simulated master.
pub struct Harness {
    pub driver: Driver,
    pub master: SimMaster,
    pub callbacks: Recorder,
}

pub fn harness(scheduler: RecordingScheduler, recorder: Recorder, config: DriverConfig) -> Harness {
    let master = SimMaster::new();
    let driver = Driver::new(scheduler, master.transport(), config);
    Harness {
        driver,
        master,
        callbacks: recorder,
    }
}

/// Fast registration timings for tests.
pub fn test_config() -> DriverConfig {
    DriverConfig {
        registration_timeout: Duration::from_millis(500),
        max_registration_attempts: 3,
        registration_backoff: skiff_driver::BackoffPolicy::fixed(
            Duration::from_millis(100),
            Duration::from_secs(1),
        ),
        ..DriverConfig::default()
    }
}

impl Harness {
    /// Start the driver and complete registration as `framework_id`.
    pub async fn register(&mut self, framework_id: &str) {
        self.register_with_heartbeat(framework_id, None).await;
    }

    pub async fn register_with_heartbeat(&mut self, framework_id: &str, heartbeat_secs: Option<f64>) {
        let driver = self.driver.clone();
        let start = tokio::spawn(async move { driver.start().await });

        let call = self.master.next_call().await.expect("registration call");
        assert!(call.is_registration(), "unexpected call: {call:?}");
        assert!(self.master.accept_registration(framework_id, heartbeat_secs));

        let state = start.await.expect("start task").expect("start");
        assert_eq!(state, DriverState::Registered);

        match self.callbacks.next().await {
            Record::Registered { framework_id: id, .. } => assert_eq!(id, framework_id),
            other => panic!("expected registered callback, got {other:?}"),
        }
    }

    /// Deliver offers and wait for the callback.
    pub async fn offer(&mut self, offers: Vec<Offer>) {
        let expected: Vec<String> = offers.iter().map(|o| o.id.to_string()).collect();
        assert!(self.master.send_offers(offers));
        assert_eq!(self.callbacks.next().await, Record::Offers(expected));
    }
}

/// Every call of the given kind in the master's history.
pub fn calls_of(master: &SimMaster, kind: &str) -> Vec<Call> {
    master
        .history()
        .into_iter()
        .filter(|call| call.kind() == kind)
        .collect()
}

/// Wait until the driver publishes `state`.
pub async fn wait_for_state(driver: &Driver, state: DriverState) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while driver.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "driver never reached {state}, stuck in {}", driver.state());
}
