//! Configuration for the scheduler driver.

use std::time::Duration;

use anyhow::{Context, Result};
use skiff_id::FrameworkId;
use skiff_protocol::FrameworkInfo;

use crate::backoff::BackoffPolicy;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Framework description sent on registration.
    pub framework: FrameworkInfo,

    /// How long to wait for a registration acknowledgment before resending.
    pub registration_timeout: Duration,

    /// Registration attempts per cycle before giving up for good.
    pub max_registration_attempts: u32,

    /// Backoff added between registration attempts.
    pub registration_backoff: BackoffPolicy,

    /// Offers older than this are treated as rescinded. `None` keeps offers
    /// until the master rescinds them.
    pub offer_ttl: Option<Duration>,

    /// Heartbeat intervals without inbound traffic before the link is
    /// considered dead.
    pub max_missed_heartbeats: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            framework: FrameworkInfo::default(),
            registration_timeout: Duration::from_secs(2),
            max_registration_attempts: 10,
            registration_backoff: BackoffPolicy::default(),
            offer_ttl: None,
            max_missed_heartbeats: 5,
        }
    }
}

impl DriverConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let name = std::env::var("SKIFF_FRAMEWORK_NAME").unwrap_or(defaults.framework.name);

        let user = std::env::var("SKIFF_FRAMEWORK_USER").unwrap_or(defaults.framework.user);

        let role = std::env::var("SKIFF_FRAMEWORK_ROLE").ok();

        // A framework ID from a previous run makes the first registration a failover
        let id = match std::env::var("SKIFF_FRAMEWORK_ID") {
            Ok(raw) => Some(
                FrameworkId::parse(&raw).context("SKIFF_FRAMEWORK_ID is not a valid framework id")?,
            ),
            Err(_) => None,
        };

        let failover_timeout_secs = std::env::var("SKIFF_FAILOVER_TIMEOUT_SECS")
            .ok()
            .map(|s| s.parse::<f64>())
            .transpose()
            .context("SKIFF_FAILOVER_TIMEOUT_SECS must be a number")?;

        let checkpoint = std::env::var("SKIFF_CHECKPOINT")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let registration_timeout = std::env::var("SKIFF_REGISTRATION_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.registration_timeout);

        let max_registration_attempts = std::env::var("SKIFF_MAX_REGISTRATION_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_registration_attempts);

        let offer_ttl = std::env::var("SKIFF_OFFER_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs);

        let max_missed_heartbeats = std::env::var("SKIFF_MAX_MISSED_HEARTBEATS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_missed_heartbeats);

        if max_registration_attempts == 0 {
            anyhow::bail!("SKIFF_MAX_REGISTRATION_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            framework: FrameworkInfo {
                id,
                name,
                user,
                role,
                failover_timeout_secs,
                checkpoint,
                hostname: std::env::var("HOSTNAME").ok(),
            },
            registration_timeout,
            max_registration_attempts,
            registration_backoff: defaults.registration_backoff,
            offer_ttl,
            max_missed_heartbeats,
        })
    }
}
