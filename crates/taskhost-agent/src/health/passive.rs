//! Passive (heartbeat staleness) health checking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use taskhost_core::{HealthCheckOutcome, HealthState, InstanceId, PassiveHealthCheck};

use super::HealthCheckManager;

struct WatchedInstance {
    period: Duration,
    last_ping: Instant,
}

/// Staleness detector driven by heartbeats the instances report themselves.
///
/// An instance is healthy while the gap since its last heartbeat stays under
/// its period plus a fixed tolerance buffer absorbing scheduling jitter.
pub struct PassiveHealthCheckManager {
    tolerance_buffer: Duration,
    instances: Mutex<HashMap<InstanceId, WatchedInstance>>,
}

impl PassiveHealthCheckManager {
    pub fn new(tolerance_buffer: Duration) -> Self {
        Self {
            tolerance_buffer,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Record a heartbeat. Heartbeats for unwatched instances are dropped.
    pub fn handle_ping(&self, instance_id: &InstanceId) {
        let mut instances = self.instances.lock().unwrap();
        if let Some(watched) = instances.get_mut(instance_id) {
            watched.last_ping = Instant::now();
        }
    }
}

#[async_trait]
impl HealthCheckManager for PassiveHealthCheckManager {
    type Config = PassiveHealthCheck;

    fn watch_instance(&self, instance_id: InstanceId, config: Self::Config) {
        let period = Duration::from_millis(config.period_in_ms());
        info!(
            instance_id = %instance_id,
            period_ms = period.as_millis() as u64,
            "watching task instance with passive health check"
        );
        // Seeding last_ping makes a freshly watched instance healthy before
        // its first real heartbeat.
        self.instances.lock().unwrap().insert(
            instance_id,
            WatchedInstance {
                period,
                last_ping: Instant::now(),
            },
        );
    }

    fn remove_instance(&self, instance_id: &InstanceId) {
        info!(instance_id = %instance_id, "stop watching task instance");
        self.instances.lock().unwrap().remove(instance_id);
    }

    async fn health_check(
        &self,
        _prev: &HashMap<InstanceId, HealthState>,
    ) -> Vec<HealthCheckOutcome> {
        debug!("running passive health check");
        let now = Instant::now();
        let instances = self.instances.lock().unwrap();
        instances
            .iter()
            .map(|(instance_id, watched)| {
                let stale_after = watched.period + self.tolerance_buffer;
                let state = if now.duration_since(watched.last_ping) < stale_after {
                    HealthState::Success
                } else {
                    HealthState::Failed
                };
                HealthCheckOutcome {
                    instance_id: instance_id.clone(),
                    state,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_of(outcomes: &[HealthCheckOutcome], id: &InstanceId) -> HealthState {
        outcomes
            .iter()
            .find(|o| &o.instance_id == id)
            .expect("instance not evaluated")
            .state
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_instance_is_healthy_without_heartbeat() {
        let manager = PassiveHealthCheckManager::new(Duration::from_millis(2000));
        let id = InstanceId::new("i-1");
        manager.watch_instance(id.clone(), PassiveHealthCheck { period_in_ms: Some(5000) });

        let outcomes = manager.health_check(&HashMap::new()).await;
        assert_eq!(state_of(&outcomes, &id), HealthState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_goes_stale_after_period_plus_tolerance() {
        let manager = PassiveHealthCheckManager::new(Duration::from_millis(2000));
        let id = InstanceId::new("i-1");
        manager.watch_instance(id.clone(), PassiveHealthCheck { period_in_ms: Some(5000) });

        tokio::time::advance(Duration::from_millis(6999)).await;
        let outcomes = manager.health_check(&HashMap::new()).await;
        assert_eq!(state_of(&outcomes, &id), HealthState::Success);

        tokio::time::advance(Duration::from_millis(1)).await;
        let outcomes = manager.health_check(&HashMap::new()).await;
        assert_eq!(state_of(&outcomes, &id), HealthState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_instance_healthy() {
        let manager = PassiveHealthCheckManager::new(Duration::from_millis(2000));
        let id = InstanceId::new("i-1");
        manager.watch_instance(id.clone(), PassiveHealthCheck { period_in_ms: Some(5000) });

        tokio::time::advance(Duration::from_millis(6000)).await;
        manager.handle_ping(&id);
        tokio::time::advance(Duration::from_millis(6000)).await;

        let outcomes = manager.health_check(&HashMap::new()).await;
        assert_eq!(state_of(&outcomes, &id), HealthState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_for_unwatched_instance_is_dropped() {
        let manager = PassiveHealthCheckManager::new(Duration::from_millis(2000));
        manager.handle_ping(&InstanceId::new("ghost"));

        let outcomes = manager.health_check(&HashMap::new()).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_instance_is_not_evaluated() {
        let manager = PassiveHealthCheckManager::new(Duration::from_millis(2000));
        let id = InstanceId::new("i-1");
        manager.watch_instance(id.clone(), PassiveHealthCheck { period_in_ms: None });
        manager.remove_instance(&id);

        let outcomes = manager.health_check(&HashMap::new()).await;
        assert!(outcomes.is_empty());
    }
}
