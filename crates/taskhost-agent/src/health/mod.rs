//! Health-check strategies.
//!
//! A manager owns the per-instance timing/counter state of one strategy;
//! the orchestrator owns which strategy an instance uses and the last-known
//! outcomes. Two independent implementations share only the capability
//! contract, no base state.

use std::collections::HashMap;

use async_trait::async_trait;

use taskhost_core::{HealthCheckOutcome, HealthState, InstanceId};

pub mod delta;
pub mod passive;
pub mod ping;

pub use delta::{outcome_delta, OutcomeDelta};
pub use passive::PassiveHealthCheckManager;
pub use ping::{HttpProber, PingHealthCheckManager, ProbeError, ReqwestProber};

/// One liveness-determination strategy.
#[async_trait]
pub trait HealthCheckManager: Send + Sync {
    /// Strategy-specific configuration attached to an instance.
    type Config;

    /// Start watching an instance. A freshly watched instance is considered
    /// provisionally healthy from this moment.
    fn watch_instance(&self, instance_id: InstanceId, config: Self::Config);

    /// Discard all state for an instance.
    fn remove_instance(&self, instance_id: &InstanceId);

    /// Evaluate every watched instance. `prev` carries the outcomes recorded
    /// on the previous tick for strategies that reuse them.
    async fn health_check(
        &self,
        prev: &HashMap<InstanceId, HealthState>,
    ) -> Vec<HealthCheckOutcome>;
}
