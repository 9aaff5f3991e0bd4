//! Simulated master.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use skiff_id::{FrameworkId, OfferId};
use skiff_protocol::{
    Call, Event, Inbound, InboundSender, MasterInfo, Offer, TaskStatus, Transport, TransportError,
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// How long [`SimMaster::next_call`] waits before giving up.
const CALL_WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct SimState {
    inbound: Option<InboundSender>,
    linked: bool,
    closed: bool,

    /// Every call accepted, in order.
    history: Vec<Call>,
    reconnects: Vec<String>,

    refuse_open: bool,
    fail_sends: bool,

    /// Restore the link by itself when the driver asks to reconnect.
    auto_reconnect: bool,

    /// Holds the next `open` until released.
    open_gate: Option<OpenGate>,
}

struct OpenGate {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

struct Shared {
    state: Mutex<SimState>,
    calls_tx: mpsc::UnboundedSender<Call>,
    calls_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Call>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the state from the rest of the test
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Transport half handed to the driver.
#[derive(Clone)]
pub struct SimTransport {
    shared: Arc<Shared>,
}

/// Master half driven by the test.
#[derive(Clone)]
pub struct SimMaster {
    shared: Arc<Shared>,
}

impl Default for SimMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMaster {
    pub fn new() -> Self {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState {
                    auto_reconnect: true,
                    ..SimState::default()
                }),
                calls_tx,
                calls_rx: tokio::sync::Mutex::new(calls_rx),
            }),
        }
    }

    /// The transport to construct the driver with.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(SimTransport {
            shared: self.shared.clone(),
        })
    }

    /// Master identity used by [`SimMaster::accept_registration`].
    pub fn info() -> MasterInfo {
        MasterInfo {
            id: "sim-master".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 5050,
            version: Some("sim".to_string()),
        }
    }

    // =========================================================================
    // Outbound side
    // =========================================================================

    /// The next call the driver sent, waiting for it if necessary.
    ///
    /// Returns `None` if nothing arrives in time.
    pub async fn next_call(&self) -> Option<Call> {
        let mut calls = self.shared.calls_rx.lock().await;
        tokio::time::timeout(CALL_WAIT, calls.recv())
            .await
            .ok()
            .flatten()
    }

    /// Calls sent but not yet read with `next_call`.
    pub async fn drain_calls(&self) -> Vec<Call> {
        let mut calls = self.shared.calls_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(call) = calls.try_recv() {
            drained.push(call);
        }
        drained
    }

    /// Every call the driver sent, in order.
    pub fn history(&self) -> Vec<Call> {
        self.shared.state().history.clone()
    }

    /// Number of calls of the given kind sent so far.
    pub fn count(&self, kind: &str) -> usize {
        self.shared
            .state()
            .history
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    // =========================================================================
    // Inbound side
    // =========================================================================

    /// Push an event to the driver. Returns false if there is no link.
    pub fn send_event(&self, event: Event) -> bool {
        let state = self.shared.state();
        if !state.linked {
            return false;
        }
        match &state.inbound {
            Some(inbound) => inbound.send(Inbound::Message(event)).is_ok(),
            None => false,
        }
    }

    /// Acknowledge registration under `framework_id`.
    pub fn accept_registration(&self, framework_id: &str, heartbeat_secs: Option<f64>) -> bool {
        let Ok(framework_id) = FrameworkId::parse(framework_id) else {
            return false;
        };
        self.send_event(Event::Registered {
            framework_id,
            master: Self::info(),
            heartbeat_interval_secs: heartbeat_secs,
        })
    }

    pub fn send_offers(&self, offers: Vec<Offer>) -> bool {
        self.send_event(Event::Offers { offers })
    }

    pub fn rescind(&self, offer_id: &OfferId) -> bool {
        self.send_event(Event::Rescind {
            offer_id: offer_id.clone(),
        })
    }

    pub fn send_update(&self, status: TaskStatus) -> bool {
        self.send_event(Event::Update { status })
    }

    pub fn heartbeat(&self) -> bool {
        self.send_event(Event::Heartbeat)
    }

    pub fn send_error(&self, message: &str) -> bool {
        self.send_event(Event::Error {
            message: message.to_string(),
        })
    }

    // =========================================================================
    // Link control
    // =========================================================================

    /// Break the link. Calls fail with `NotConnected` until it is restored.
    pub fn drop_link(&self, reason: &str) {
        let mut state = self.shared.state();
        state.linked = false;
        if let Some(inbound) = &state.inbound {
            let _ = inbound.send(Inbound::LinkLost {
                reason: reason.to_string(),
            });
        }
    }

    /// Break the link without reporting it, as when the loss has not been
    /// noticed yet.
    pub fn sever_link(&self) {
        self.shared.state().linked = false;
    }

    /// Bring the link back.
    pub fn restore_link(&self) {
        let mut state = self.shared.state();
        if state.closed {
            return;
        }
        state.linked = true;
        if let Some(inbound) = &state.inbound {
            let _ = inbound.send(Inbound::LinkRestored);
        }
    }

    pub fn is_linked(&self) -> bool {
        self.shared.state().linked
    }

    /// Make `open` fail.
    pub fn refuse_open(&self, refuse: bool) {
        self.shared.state().refuse_open = refuse;
    }

    /// Hold the next `open` until the returned sender fires or is dropped.
    ///
    /// The returned receiver resolves once `open` has been entered.
    pub fn gate_open(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.shared.state().open_gate = Some(OpenGate {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    /// Make every `send` fail while set.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.state().fail_sends = fail;
    }

    /// Whether a driver-requested reconnect restores the link by itself.
    pub fn auto_reconnect(&self, enabled: bool) {
        self.shared.state().auto_reconnect = enabled;
    }

    /// Reasons given for every reconnect the driver requested.
    pub fn reconnects(&self) -> Vec<String> {
        self.shared.state().reconnects.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn open(&self, inbound: InboundSender) -> Result<(), TransportError> {
        let gate = self.shared.state().open_gate.take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.await;
        }

        let mut state = self.shared.state();
        if state.refuse_open {
            return Err(TransportError::ConnectionFailed(
                "simulated master refused connection".to_string(),
            ));
        }
        state.inbound = Some(inbound);
        state.linked = true;
        state.closed = false;
        debug!("Simulated link opened");
        Ok(())
    }

    async fn send(&self, call: Call) -> Result<(), TransportError> {
        let mut state = self.shared.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.linked {
            return Err(TransportError::NotConnected);
        }
        if state.fail_sends {
            return Err(TransportError::SendFailed("simulated send failure".to_string()));
        }

        debug!(call = call.kind(), "Simulated master received call");
        state.history.push(call.clone());
        let _ = self.shared.calls_tx.send(call);
        Ok(())
    }

    async fn reconnect(&self, reason: &str) {
        let mut state = self.shared.state();
        state.reconnects.push(reason.to_string());
        let Some(inbound) = state.inbound.clone() else {
            return;
        };

        state.linked = false;
        let _ = inbound.send(Inbound::LinkLost {
            reason: reason.to_string(),
        });

        if state.auto_reconnect && !state.closed {
            state.linked = true;
            let _ = inbound.send(Inbound::LinkRestored);
        }
    }

    async fn close(&self) {
        let mut state = self.shared.state();
        state.closed = true;
        state.linked = false;
        state.inbound = None;
        debug!("Simulated link closed");
    }
}
