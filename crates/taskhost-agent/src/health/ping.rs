//! Active (HTTP probing) health checking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use taskhost_core::{HealthCheckOutcome, HealthState, InstanceId, PingHealthCheck};

use super::HealthCheckManager;

const DEFAULT_PROBE_PATH: &str = "/ping";
const PROBE_BATCH_SIZE: usize = 10;
const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A probe that did not come back healthy.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

/// Issues one liveness probe against an instance's endpoint.
#[async_trait]
pub trait HttpProber: Send + Sync {
    async fn probe(&self, url: &str) -> Result<(), ProbeError>;
}

/// Production prober over reqwest. Any transport error, timeout or
/// non-success status counts as a failed probe.
pub struct ReqwestProber {
    inner: reqwest::Client,
}

impl ReqwestProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl HttpProber for ReqwestProber {
    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        let response = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| ProbeError(e.to_string()))?;
        Ok(())
    }
}

struct ProbedInstance {
    config: PingHealthCheck,
    last_probe_at: Option<Instant>,
    consecutive_failures: u32,
}

/// Active prober with failure debouncing.
///
/// A single missed probe doesn't flip an instance to failed; only reaching
/// the consecutive-failure threshold does, and one successful probe resets
/// the counter.
pub struct PingHealthCheckManager {
    prober: Arc<dyn HttpProber>,
    instances: Mutex<HashMap<InstanceId, ProbedInstance>>,
}

impl PingHealthCheckManager {
    pub fn new(prober: Arc<dyn HttpProber>) -> Self {
        Self {
            prober,
            instances: Mutex::new(HashMap::new()),
        }
    }
}

fn probe_url(config: &PingHealthCheck) -> String {
    format!(
        "{}{}",
        config.domain,
        config.path.as_deref().unwrap_or(DEFAULT_PROBE_PATH)
    )
}

#[async_trait]
impl HealthCheckManager for PingHealthCheckManager {
    type Config = PingHealthCheck;

    fn watch_instance(&self, instance_id: InstanceId, config: Self::Config) {
        info!(
            instance_id = %instance_id,
            domain = %config.domain,
            path = config.path.as_deref().unwrap_or(DEFAULT_PROBE_PATH),
            period_ms = config.period_in_ms(),
            "watching task instance with ping health check"
        );
        self.instances.lock().unwrap().insert(
            instance_id,
            ProbedInstance {
                config,
                last_probe_at: None,
                consecutive_failures: 0,
            },
        );
    }

    fn remove_instance(&self, instance_id: &InstanceId) {
        info!(instance_id = %instance_id, "stop watching task instance");
        self.instances.lock().unwrap().remove(instance_id);
    }

    async fn health_check(
        &self,
        prev: &HashMap<InstanceId, HealthState>,
    ) -> Vec<HealthCheckOutcome> {
        debug!("running ping health check");
        let now = Instant::now();
        let mut results = Vec::new();

        let due: Vec<(InstanceId, PingHealthCheck)> = {
            let mut instances = self.instances.lock().unwrap();
            let mut due = Vec::new();
            for (instance_id, watched) in instances.iter_mut() {
                let period = Duration::from_millis(watched.config.period_in_ms());
                if watched.last_probe_at.map_or(true, |at| at + period < now) {
                    watched.last_probe_at = Some(now);
                    due.push((instance_id.clone(), watched.config.clone()));
                } else {
                    // Not due yet; carry the previous outcome forward. A new
                    // instance with no recorded outcome starts as success.
                    results.push(HealthCheckOutcome {
                        instance_id: instance_id.clone(),
                        state: prev
                            .get(instance_id)
                            .copied()
                            .unwrap_or(HealthState::Success),
                    });
                }
            }
            due
        };

        // Bound concurrent outbound connections: probe in sequential batches.
        for batch in due.chunks(PROBE_BATCH_SIZE) {
            let probes = batch.iter().map(|(instance_id, config)| {
                let url = probe_url(config);
                async move {
                    let outcome = self.prober.probe(&url).await;
                    if let Err(err) = &outcome {
                        info!(instance_id = %instance_id, url = %url, error = %err, "ping probe failed");
                    }
                    (instance_id, outcome.is_ok())
                }
            });
            let probed = join_all(probes).await;

            let mut instances = self.instances.lock().unwrap();
            for (instance_id, success) in probed {
                let Some(watched) = instances.get_mut(instance_id) else {
                    // Removed while the probe was in flight.
                    continue;
                };
                if success {
                    watched.consecutive_failures = 0;
                } else {
                    watched.consecutive_failures += 1;
                    debug!(
                        instance_id = %instance_id,
                        consecutive_failures = watched.consecutive_failures,
                        "ping health check failure recorded"
                    );
                }
                let state = if watched.consecutive_failures < CONSECUTIVE_FAILURE_THRESHOLD {
                    HealthState::Success
                } else {
                    HealthState::Failed
                };
                results.push(HealthCheckOutcome {
                    instance_id: instance_id.clone(),
                    state,
                });
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct TogglingProber {
        succeed: AtomicBool,
        calls: AtomicU32,
    }

    impl TogglingProber {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed: AtomicBool::new(succeed),
                calls: AtomicU32::new(0),
            })
        }

        fn set_succeed(&self, succeed: bool) {
            self.succeed.store(succeed, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HttpProber for TogglingProber {
        async fn probe(&self, _url: &str) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProbeError("connection refused".to_string()))
            }
        }
    }

    fn watched_manager(prober: Arc<TogglingProber>) -> (PingHealthCheckManager, InstanceId) {
        let manager = PingHealthCheckManager::new(prober);
        let id = InstanceId::new("i-1");
        manager.watch_instance(
            id.clone(),
            PingHealthCheck {
                domain: "http://localhost:9999".to_string(),
                path: None,
                period_in_ms: Some(5000),
            },
        );
        (manager, id)
    }

    async fn tick(manager: &PingHealthCheckManager, id: &InstanceId) -> HealthState {
        tokio::time::advance(Duration::from_millis(5001)).await;
        let outcomes = manager.health_check(&HashMap::new()).await;
        outcomes
            .iter()
            .find(|o| &o.instance_id == id)
            .expect("instance not evaluated")
            .state
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_never_fails() {
        let prober = TogglingProber::new(false);
        let (manager, id) = watched_manager(Arc::clone(&prober));

        assert_eq!(tick(&manager, &id).await, HealthState::Success);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);

        prober.set_succeed(true);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);

        // Counter was reset; two more failures still stay under the threshold.
        prober.set_succeed(false);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_consecutive_failures_flip_to_failed() {
        let prober = TogglingProber::new(false);
        let (manager, id) = watched_manager(Arc::clone(&prober));

        assert_eq!(tick(&manager, &id).await, HealthState::Success);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);
        assert_eq!(tick(&manager, &id).await, HealthState::Failed);

        // One success flips it straight back.
        prober.set_succeed(true);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_due_instance_reuses_previous_outcome() {
        let prober = TogglingProber::new(true);
        let (manager, id) = watched_manager(Arc::clone(&prober));

        // First evaluation probes (no last-probe time yet).
        let outcomes = manager.health_check(&HashMap::new()).await;
        assert_eq!(outcomes[0].state, HealthState::Success);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

        // Within the period nothing is probed; the previous outcome carries.
        tokio::time::advance(Duration::from_millis(1000)).await;
        let prev = HashMap::from([(id.clone(), HealthState::Failed)]);
        let outcomes = manager.health_check(&prev).await;
        assert_eq!(outcomes[0].state, HealthState::Failed);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

        // With no recorded outcome a not-due instance defaults to success.
        let outcomes = manager.health_check(&HashMap::new()).await;
        assert_eq!(outcomes[0].state, HealthState::Success);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_watched_instance_is_probed_across_batches() {
        let prober = TogglingProber::new(true);
        let manager = PingHealthCheckManager::new(Arc::clone(&prober) as Arc<dyn HttpProber>);
        for i in 0..25 {
            manager.watch_instance(
                InstanceId::new(format!("i-{i}")),
                PingHealthCheck {
                    domain: format!("http://host-{i}"),
                    path: Some("/status".to_string()),
                    period_in_ms: None,
                },
            );
        }

        let outcomes = manager.health_check(&HashMap::new()).await;
        assert_eq!(outcomes.len(), 25);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_clears_counter_state() {
        let prober = TogglingProber::new(false);
        let (manager, id) = watched_manager(Arc::clone(&prober));

        assert_eq!(tick(&manager, &id).await, HealthState::Success);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);
        manager.remove_instance(&id);

        // Re-watching starts from a clean counter.
        manager.watch_instance(
            id.clone(),
            PingHealthCheck {
                domain: "http://localhost:9999".to_string(),
                path: None,
                period_in_ms: Some(5000),
            },
        );
        assert_eq!(tick(&manager, &id).await, HealthState::Success);
        assert_eq!(tick(&manager, &id).await, HealthState::Success);
    }
}
