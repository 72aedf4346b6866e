//! Health-check configuration and evaluation outcomes.

use crate::InstanceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default evaluation period for both health-check kinds, in milliseconds.
pub const DEFAULT_HEALTH_CHECK_PERIOD_MS: u64 = 5000;

/// Smallest tolerance buffer the passive staleness detector accepts, in
/// milliseconds. The buffer absorbs scheduling jitter between heartbeats.
pub const MIN_TOLERANCE_BUFFER_MS: u64 = 2000;

/// Active probing: the agent issues `GET {domain}{path}` on each due tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingHealthCheck {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_in_ms: Option<u64>,
}

impl PingHealthCheck {
    /// Effective probing period.
    pub fn period_in_ms(&self) -> u64 {
        self.period_in_ms.unwrap_or(DEFAULT_HEALTH_CHECK_PERIOD_MS)
    }
}

/// Passive heartbeats: the instance reports liveness itself; the agent only
/// detects staleness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassiveHealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_in_ms: Option<u64>,
}

impl PassiveHealthCheck {
    /// Effective heartbeat period.
    pub fn period_in_ms(&self) -> u64 {
        self.period_in_ms.unwrap_or(DEFAULT_HEALTH_CHECK_PERIOD_MS)
    }
}

/// Liveness-determination strategy attached to a task instance.
///
/// Immutable once attached; attached at most once per instance for the
/// instance's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HealthCheckConfig {
    Ping(PingHealthCheck),
    Passive(PassiveHealthCheck),
}

impl HealthCheckConfig {
    /// Effective evaluation period of either variant.
    pub fn period_in_ms(&self) -> u64 {
        match self {
            Self::Ping(config) => config.period_in_ms(),
            Self::Passive(config) => config.period_in_ms(),
        }
    }

    pub fn is_passive(&self) -> bool {
        matches!(self, Self::Passive(_))
    }
}

/// Result of one evaluation of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Success,
    Failed,
}

/// Output of one evaluation cycle of a health-check manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckOutcome {
    pub instance_id: InstanceId,
    pub state: HealthState,
}

/// Rejected tolerance-buffer configuration.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("tolerance buffer {0} ms is below the minimum of {MIN_TOLERANCE_BUFFER_MS} ms")]
pub struct ToleranceBufferError(pub u64);

/// Validate a configured passive tolerance buffer against policy.
pub fn validate_tolerance_buffer(buffer_ms: u64) -> Result<u64, ToleranceBufferError> {
    if buffer_ms < MIN_TOLERANCE_BUFFER_MS {
        return Err(ToleranceBufferError(buffer_ms));
    }
    Ok(buffer_ms)
}
