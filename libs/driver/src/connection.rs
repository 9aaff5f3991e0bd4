//! Connection state machine.
//!
//! ```text
//! Unregistered ──start──▶ Registering ──ack──▶ Registered
//!                             ▲                    │
//!                   link restored              link lost
//!                             │                    ▼
//!                             └──────────── Disconnected
//!
//! any state ──stop / fatal error──▶ Stopped
//! ```
//!
//! The machine is pure: it never performs I/O. Callers pass the current time
//! in and act on the `Call`s it hands back.

use std::time::Duration;

use skiff_id::FrameworkId;
use skiff_protocol::{Call, FrameworkInfo, MasterInfo};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};

/// Registration status of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// Created, `start` not yet called.
    Unregistered,
    /// Waiting for a registration acknowledgment.
    Registering,
    /// Registered with a master; operations are permitted.
    Registered,
    /// Link lost; waiting for the transport to reconnect.
    Disconnected,
    /// Terminal.
    Stopped,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriverState::Unregistered => "unregistered",
            DriverState::Registering => "registering",
            DriverState::Registered => "registered",
            DriverState::Disconnected => "disconnected",
            DriverState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a registration acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The driver moved to `Registered`; deliver the callback.
    Registered,
    /// Duplicate or stale acknowledgment; nothing to deliver.
    Ignored,
}

/// What to do when the registration timer fires.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Send the registration call again.
    Resend(Call),
    /// Attempts are used up; the failure is terminal.
    Exhausted { attempts: u32 },
    /// Nothing is due.
    Idle,
}

/// Tracks registration status, framework identity, and the current master.
#[derive(Debug)]
pub struct Connection {
    state: DriverState,
    framework: FrameworkInfo,
    master: Option<MasterInfo>,

    /// Incremented every time the link is lost.
    epoch: u64,

    /// Registration attempts in the current cycle.
    attempts: u32,
    retry_at: Option<Instant>,

    heartbeat_interval: Option<Duration>,
    last_inbound_at: Option<Instant>,

    /// First fatal failure, if any.
    failure: Option<DriverError>,
}

impl Connection {
    /// Create a connection for the given framework.
    ///
    /// If `framework.id` is already set the first registration is a failover.
    pub fn new(framework: FrameworkInfo) -> Self {
        Self {
            state: DriverState::Unregistered,
            framework,
            master: None,
            epoch: 0,
            attempts: 0,
            retry_at: None,
            heartbeat_interval: None,
            last_inbound_at: None,
            failure: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn framework_id(&self) -> Option<&FrameworkId> {
        self.framework.id.as_ref()
    }

    pub fn master(&self) -> Option<&MasterInfo> {
        self.master.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn failure(&self) -> Option<&DriverError> {
        self.failure.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.state == DriverState::Stopped
    }

    /// The call that (re-)registers this framework.
    pub fn registration_call(&self) -> Call {
        let framework = self.framework.clone();
        if framework.id.is_some() {
            Call::Reregister { framework }
        } else {
            Call::Register { framework }
        }
    }

    /// `Unregistered → Registering`. Returns the first registration call.
    pub fn begin(&mut self, now: Instant, timeout: Duration) -> DriverResult<Call> {
        match self.state {
            DriverState::Unregistered => {}
            DriverState::Stopped => return Err(DriverError::Stopped),
            state => return Err(DriverError::AlreadyStarted { state }),
        }

        self.transition(DriverState::Registering);
        self.attempts = 1;
        self.retry_at = Some(now + timeout);

        Ok(self.registration_call())
    }

    /// Handle a registration acknowledgment.
    ///
    /// The framework ID is adopted on first registration and must not change
    /// afterwards.
    pub fn on_registered(
        &mut self,
        framework_id: FrameworkId,
        master: MasterInfo,
        heartbeat_interval: Option<Duration>,
        now: Instant,
    ) -> DriverResult<RegistrationOutcome> {
        if self.state != DriverState::Registering {
            debug!(
                state = %self.state,
                framework_id = %framework_id,
                "Ignoring registration acknowledgment"
            );
            return Ok(RegistrationOutcome::Ignored);
        }

        if let Some(held) = &self.framework.id {
            if *held != framework_id {
                return Err(DriverError::FrameworkIdChanged {
                    held: held.clone(),
                    received: framework_id,
                });
            }
        }

        info!(
            framework_id = %framework_id,
            master = %master.address(),
            attempts = self.attempts,
            "Registered with master"
        );

        self.framework.id = Some(framework_id);
        self.master = Some(master);
        self.heartbeat_interval = heartbeat_interval;
        self.last_inbound_at = Some(now);
        self.attempts = 0;
        self.retry_at = None;
        self.transition(DriverState::Registered);

        Ok(RegistrationOutcome::Registered)
    }

    /// `Registered | Registering → Disconnected`. Returns true on transition.
    pub fn on_link_lost(&mut self, reason: &str) -> bool {
        match self.state {
            DriverState::Registered | DriverState::Registering => {
                warn!(
                    reason = %reason,
                    state = %self.state,
                    epoch = self.epoch,
                    "Lost link to master"
                );
                self.epoch += 1;
                self.retry_at = None;
                self.transition(DriverState::Disconnected);
                true
            }
            _ => false,
        }
    }

    /// `Disconnected → Registering`. Returns the registration call to send.
    pub fn on_link_restored(&mut self, now: Instant, timeout: Duration) -> Option<Call> {
        if self.state != DriverState::Disconnected {
            return None;
        }

        self.transition(DriverState::Registering);
        self.attempts = 1;
        self.retry_at = Some(now + timeout);

        Some(self.registration_call())
    }

    /// Decide whether to resend registration.
    pub fn on_retry_timer(&mut self, now: Instant, config: &DriverConfig) -> RetryDecision {
        if self.state != DriverState::Registering {
            return RetryDecision::Idle;
        }

        match self.retry_at {
            Some(at) if at <= now => {}
            _ => return RetryDecision::Idle,
        }

        if self.attempts >= config.max_registration_attempts {
            self.retry_at = None;
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        let delay = config.registration_timeout
            + config.registration_backoff.delay(self.attempts.saturating_sub(1));
        self.attempts += 1;
        self.retry_at = Some(now + delay);

        info!(
            attempt = self.attempts,
            next_retry_ms = delay.as_millis() as u64,
            "Resending registration"
        );

        RetryDecision::Resend(self.registration_call())
    }

    /// Note that something arrived from the master.
    pub fn record_inbound(&mut self, now: Instant) {
        self.last_inbound_at = Some(now);
    }

    /// When the master will be considered silent, if heartbeats are expected.
    pub fn heartbeat_deadline(&self, max_missed: u32) -> Option<Instant> {
        if self.state != DriverState::Registered || max_missed == 0 {
            return None;
        }
        let interval = self.heartbeat_interval?;
        let last = self.last_inbound_at?;
        // An interval too large to represent disables the watchdog
        interval
            .checked_mul(max_missed)
            .and_then(|silence| last.checked_add(silence))
    }

    /// The next instant at which a timer needs attention.
    pub fn next_deadline(&self, max_missed: u32) -> Option<Instant> {
        match self.state {
            DriverState::Registering => self.retry_at,
            DriverState::Registered => self.heartbeat_deadline(max_missed),
            _ => None,
        }
    }

    /// Returns true if heartbeats are overdue.
    pub fn heartbeat_expired(&self, now: Instant, max_missed: u32) -> bool {
        self.heartbeat_deadline(max_missed)
            .is_some_and(|deadline| deadline <= now)
    }

    /// Framework ID if operations are permitted, else the state violation.
    pub fn ensure_registered(&self) -> DriverResult<FrameworkId> {
        match (self.state, &self.framework.id) {
            (DriverState::Registered, Some(id)) => Ok(id.clone()),
            (DriverState::Stopped, _) => Err(DriverError::Stopped),
            (state, _) => Err(DriverError::NotConnected { state }),
        }
    }

    /// Move to `Stopped`. Returns false if already stopped.
    ///
    /// The first recorded failure wins.
    pub fn stop(&mut self, failure: Option<DriverError>) -> bool {
        if self.state == DriverState::Stopped {
            return false;
        }
        if self.failure.is_none() {
            self.failure = failure;
        }
        self.retry_at = None;
        self.transition(DriverState::Stopped);
        true
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = %self.state, to = %next, "Driver state transition");
        self.state = next;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;

    fn master() -> MasterInfo {
        MasterInfo {
            id: "master-1".to_string(),
            hostname: "10.0.0.1".to_string(),
            port: 5050,
            version: None,
        }
    }

    fn fw(id: &str) -> FrameworkId {
        FrameworkId::parse(id).unwrap()
    }

    fn config(max_attempts: u32) -> DriverConfig {
        DriverConfig {
            registration_timeout: Duration::from_secs(1),
            max_registration_attempts: max_attempts,
            registration_backoff: BackoffPolicy::fixed(
                Duration::from_millis(100),
                Duration::from_secs(1),
            ),
            ..DriverConfig::default()
        }
    }

    #[test]
    fn test_begin_sends_register() {
        let mut conn = Connection::new(FrameworkInfo::default());
        let now = Instant::now();

        let call = conn.begin(now, Duration::from_secs(1)).unwrap();
        assert!(matches!(call, Call::Register { .. }));
        assert_eq!(conn.state(), DriverState::Registering);
        assert_eq!(conn.next_deadline(5), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_begin_with_known_id_reregisters() {
        let framework = FrameworkInfo {
            id: Some(fw("fw-1")),
            ..FrameworkInfo::default()
        };
        let mut conn = Connection::new(framework);

        let call = conn.begin(Instant::now(), Duration::from_secs(1)).unwrap();
        assert!(matches!(call, Call::Reregister { .. }));
    }

    #[test]
    fn test_begin_twice_fails() {
        let mut conn = Connection::new(FrameworkInfo::default());
        conn.begin(Instant::now(), Duration::from_secs(1)).unwrap();

        let err = conn.begin(Instant::now(), Duration::from_secs(1)).unwrap_err();
        assert_eq!(
            err,
            DriverError::AlreadyStarted {
                state: DriverState::Registering
            }
        );
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut conn = Connection::new(FrameworkInfo::default());
        let now = Instant::now();
        conn.begin(now, Duration::from_secs(1)).unwrap();

        let outcome = conn.on_registered(fw("fw-1"), master(), None, now).unwrap();
        assert_eq!(outcome, RegistrationOutcome::Registered);
        assert_eq!(conn.state(), DriverState::Registered);
        assert_eq!(conn.framework_id(), Some(&fw("fw-1")));
        assert_eq!(conn.ensure_registered().unwrap(), fw("fw-1"));

        // Duplicate ack within the same cycle is ignored
        let outcome = conn.on_registered(fw("fw-1"), master(), None, now).unwrap();
        assert_eq!(outcome, RegistrationOutcome::Ignored);

        assert!(conn.on_link_lost("reset"));
        assert_eq!(conn.state(), DriverState::Disconnected);
        assert_eq!(conn.epoch(), 1);
        assert_eq!(
            conn.ensure_registered().unwrap_err(),
            DriverError::NotConnected {
                state: DriverState::Disconnected
            }
        );

        // Re-registration keeps the framework id
        let call = conn.on_link_restored(now, Duration::from_secs(1)).unwrap();
        match call {
            Call::Reregister { framework } => assert_eq!(framework.id, Some(fw("fw-1"))),
            other => panic!("unexpected call: {other:?}"),
        }

        let outcome = conn.on_registered(fw("fw-1"), master(), None, now).unwrap();
        assert_eq!(outcome, RegistrationOutcome::Registered);
    }

    #[test]
    fn test_framework_id_must_not_change() {
        let mut conn = Connection::new(FrameworkInfo::default());
        let now = Instant::now();
        conn.begin(now, Duration::from_secs(1)).unwrap();
        conn.on_registered(fw("fw-1"), master(), None, now).unwrap();
        conn.on_link_lost("reset");
        conn.on_link_restored(now, Duration::from_secs(1));

        let err = conn.on_registered(fw("fw-2"), master(), None, now).unwrap_err();
        assert!(matches!(err, DriverError::FrameworkIdChanged { .. }));
        assert_eq!(conn.framework_id(), Some(&fw("fw-1")));
    }

    #[test]
    fn test_retry_until_exhausted() {
        let config = config(3);
        let mut conn = Connection::new(FrameworkInfo::default());
        let start = Instant::now();
        conn.begin(start, config.registration_timeout).unwrap();

        // Not yet due
        assert_eq!(conn.on_retry_timer(start, &config), RetryDecision::Idle);

        let t1 = start + Duration::from_secs(1);
        assert!(matches!(
            conn.on_retry_timer(t1, &config),
            RetryDecision::Resend(Call::Register { .. })
        ));
        assert_eq!(conn.attempts(), 2);
        assert_eq!(
            conn.next_deadline(5),
            Some(t1 + Duration::from_millis(1100))
        );

        let t2 = t1 + Duration::from_millis(1100);
        assert!(matches!(
            conn.on_retry_timer(t2, &config),
            RetryDecision::Resend(_)
        ));

        let t3 = t2 + Duration::from_secs(5);
        assert_eq!(
            conn.on_retry_timer(t3, &config),
            RetryDecision::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn test_heartbeat_deadline() {
        let mut conn = Connection::new(FrameworkInfo::default());
        let now = Instant::now();
        conn.begin(now, Duration::from_secs(1)).unwrap();
        conn.on_registered(fw("fw-1"), master(), Some(Duration::from_secs(15)), now)
            .unwrap();

        assert_eq!(
            conn.heartbeat_deadline(2),
            Some(now + Duration::from_secs(30))
        );
        assert!(!conn.heartbeat_expired(now + Duration::from_secs(29), 2));
        assert!(conn.heartbeat_expired(now + Duration::from_secs(30), 2));

        conn.record_inbound(now + Duration::from_secs(20));
        assert!(!conn.heartbeat_expired(now + Duration::from_secs(30), 2));

        // Watchdog disabled
        assert_eq!(conn.heartbeat_deadline(0), None);
    }

    #[test]
    fn test_huge_heartbeat_interval_disables_watchdog() {
        let mut conn = Connection::new(FrameworkInfo::default());
        let now = Instant::now();
        conn.begin(now, Duration::from_secs(1)).unwrap();
        conn.on_registered(fw("fw-1"), master(), Some(Duration::MAX), now)
            .unwrap();

        assert_eq!(conn.heartbeat_deadline(5), None);
        assert_eq!(conn.next_deadline(5), None);
        assert!(!conn.heartbeat_expired(now + Duration::from_secs(3600), 5));
    }

    #[test]
    fn test_stop_is_idempotent_and_keeps_first_failure() {
        let mut conn = Connection::new(FrameworkInfo::default());
        assert!(conn.stop(Some(DriverError::RegistrationRejected("denied".to_string()))));
        assert!(!conn.stop(None));
        assert_eq!(conn.state(), DriverState::Stopped);
        assert_eq!(
            conn.failure(),
            Some(&DriverError::RegistrationRejected("denied".to_string()))
        );
        assert_eq!(conn.ensure_registered().unwrap_err(), DriverError::Stopped);
        assert_eq!(
            conn.begin(Instant::now(), Duration::from_secs(1)).unwrap_err(),
            DriverError::Stopped
        );
    }
}
