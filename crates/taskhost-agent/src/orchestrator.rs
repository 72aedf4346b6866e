//! The task-instance orchestrator.
//!
//! Single authority translating launch/terminate requests and reporter calls
//! into OS actions, health-check registrations and control-plane status
//! reports. Owns the map from instance id to attached health-check config
//! and the last-known outcome of every watched instance; the managers own
//! their per-instance timing state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use taskhost_client::{
    ClientError, ControlPlaneClient, ReportAgentStatusRequest, ReportTaskEventRequest,
    ReportTaskInstancePidRequest, ReportTaskInstanceStatusRequest,
};
use taskhost_core::{
    AgentId, AgentTaskStatus, HealthCheckConfig, HealthState, InstanceId,
    LaunchTaskInstanceRequest, OfflineReport, TaskEventFormat, TaskEventLevel, TaskEventSource,
    TaskInstance, TerminateTaskInstanceRequest, FAILURE_EXIT_CODE,
};

use crate::health::{outcome_delta, HealthCheckManager, PassiveHealthCheckManager, PingHealthCheckManager};
use crate::journal::{JournalError, OfflineReportJournal};
use crate::launcher::{LaunchOptions, ProcessLauncher};
use crate::vars::VariableSubstitution;

/// Errors surfaced to callers of orchestrator operations. Launch and
/// termination problems are not here: those become status reports instead.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("control plane call failed: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

enum SignalError {
    NoSuchProcess,
    Delivery(String),
}

#[cfg(unix)]
fn send_termination_signal(pid: u32) -> Result<(), SignalError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(SignalError::NoSuchProcess),
        Err(errno) => Err(SignalError::Delivery(errno.desc().to_string())),
    }
}

#[cfg(not(unix))]
fn send_termination_signal(_pid: u32) -> Result<(), SignalError> {
    Err(SignalError::Delivery(
        "signal delivery is not supported on this platform".to_string(),
    ))
}

/// Everything the orchestrator composes.
pub struct OrchestratorProps {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub client: Arc<dyn ControlPlaneClient>,
    pub launcher: ProcessLauncher,
    pub substitution: VariableSubstitution,
    pub passive: Arc<PassiveHealthCheckManager>,
    pub ping: Arc<PingHealthCheckManager>,
    pub offline_report_path: PathBuf,
    pub tick_period: Duration,
    /// Channel the agent's main task listens on for self-termination.
    pub shutdown: mpsc::Sender<()>,
}

pub struct TaskInstanceOrchestrator {
    agent_id: AgentId,
    agent_name: String,
    client: Arc<dyn ControlPlaneClient>,
    launcher: ProcessLauncher,
    substitution: VariableSubstitution,
    passive: Arc<PassiveHealthCheckManager>,
    ping: Arc<PingHealthCheckManager>,
    journal: OfflineReportJournal,
    watched: Mutex<HashMap<InstanceId, HealthCheckConfig>>,
    outcomes: Mutex<HashMap<InstanceId, HealthState>>,
    tick_period: Duration,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: mpsc::Sender<()>,
}

impl TaskInstanceOrchestrator {
    pub fn new(props: OrchestratorProps) -> Self {
        Self {
            agent_id: props.agent_id,
            agent_name: props.agent_name,
            client: props.client,
            launcher: props.launcher,
            substitution: props.substitution,
            passive: props.passive,
            ping: props.ping,
            journal: OfflineReportJournal::new(props.offline_report_path),
            watched: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            tick_period: props.tick_period,
            tick_handle: Mutex::new(None),
            shutdown: props.shutdown,
        }
    }

    /// Startup sequence. Must run to completion before any command or
    /// reporter call is accepted: replay the offline journal, delete it,
    /// rehydrate health checks for instances already attributed to this
    /// agent, then start the recurring health tick.
    pub async fn init(self: &Arc<Self>) -> Result<(), AgentError> {
        info!("loading reports journaled while the agent was offline");
        let reports = self.journal.load().await?;
        info!(count = reports.len(), "found offline reports");
        self.populate_offline_reports(reports).await?;
        self.journal.remove().await?;

        info!("loading task instances currently running on this agent");
        let instances = self.client.list_running_instances(&self.agent_id).await?;
        info!(count = instances.len(), "initializing health checks of running instances");
        self.initialize_running_instance_health_checks(&instances)
            .await?;

        info!(period_ms = self.tick_period.as_millis() as u64, "starting recurring health check");
        let orchestrator = Arc::clone(self);
        let period = self.tick_period;
        let handle = tokio::spawn(async move {
            // interval_at skips the immediate first tick; awaiting the tick
            // body before re-arming means ticks never overlap.
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                orchestrator.background_task().await;
            }
        });
        *self.tick_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the recurring tick and clear in-memory state. Idempotent. Calls
    /// already in flight are not cancelled.
    pub fn terminate(&self) {
        if let Some(handle) = self.tick_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.outcomes.lock().unwrap().clear();
        self.watched.lock().unwrap().clear();
    }

    /// Launch one task instance. The outcome is always reported: `launched`
    /// on success, `failed_to_launch` with the error detail otherwise.
    pub async fn launch_task_instance(
        &self,
        request: LaunchTaskInstanceRequest,
    ) -> Result<(), AgentError> {
        info!(
            task_id = %request.task_id,
            version = request.version,
            instance_id = %request.instance_id,
            "launching task instance"
        );
        let instance_id = request.instance_id.clone();
        let health_check = request.health_check.clone();

        let options = LaunchOptions {
            passive_health_check_duration: match &health_check {
                Some(HealthCheckConfig::Passive(config)) => Some(config.period_in_ms()),
                _ => None,
            },
            offline_report_path: self.journal.path().to_path_buf(),
        };
        let resolved = self.substitution.apply(request);

        match self.launcher.launch(&resolved, &options).await {
            Ok(()) => {
                let message = format!("successfully launched task instance {instance_id}");
                info!(instance_id = %instance_id, "task instance launch requested");
                self.report_status_and_event(
                    &instance_id,
                    AgentTaskStatus::Launched,
                    TaskEventLevel::Success,
                    message,
                )
                .await?;

                if let Some(config) = health_check {
                    self.watched.lock().unwrap().insert(instance_id, config);
                }
            }
            Err(err) => {
                let message =
                    format!("failed to launch task instance {instance_id}: {err}");
                error!(instance_id = %instance_id, error = %err, "task instance launch failed");
                self.report_status_and_event(
                    &instance_id,
                    AgentTaskStatus::FailedToLaunch,
                    TaskEventLevel::Error,
                    message,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Deliver a termination signal to the instance's pid and report the
    /// outcome. A pid the OS no longer knows counts as already terminated.
    pub async fn terminate_task_instance(
        &self,
        request: TerminateTaskInstanceRequest,
    ) -> Result<(), AgentError> {
        info!(instance_id = %request.instance_id, pid = request.pid, "terminating task instance");
        match send_termination_signal(request.pid) {
            Ok(()) => {
                self.stop_instance_health_check(&request.instance_id);
                let message = format!("successfully sent SIGINT to pid {}", request.pid);
                info!(instance_id = %request.instance_id, pid = request.pid, "termination signal delivered");
                self.report_status_and_event(
                    &request.instance_id,
                    AgentTaskStatus::Terminating,
                    TaskEventLevel::Success,
                    message,
                )
                .await?;
            }
            Err(SignalError::NoSuchProcess) => {
                self.stop_instance_health_check(&request.instance_id);
                let message = format!("pid {} doesn't exist", request.pid);
                info!(instance_id = %request.instance_id, pid = request.pid, "pid already gone, treating as terminated");
                self.report_status_and_event(
                    &request.instance_id,
                    AgentTaskStatus::Terminated,
                    TaskEventLevel::Success,
                    message,
                )
                .await?;
            }
            Err(SignalError::Delivery(reason)) => {
                // Presume the instance alive; keep watching its health.
                let message =
                    format!("failed to send SIGINT to pid {}: {reason}", request.pid);
                error!(instance_id = %request.instance_id, pid = request.pid, reason = %reason, "termination signal delivery failed");
                self.report_status_and_event(
                    &request.instance_id,
                    AgentTaskStatus::AgentTerminationFailed,
                    TaskEventLevel::Error,
                    message,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Trigger agent self-termination. No instance-level side effects.
    pub async fn terminate_agent(&self) -> Result<(), AgentError> {
        info!("performing self termination");
        let _ = self.shutdown.try_send(());
        Ok(())
    }

    /// Report the agent's identity and liveness upstream.
    pub async fn get_agent_status(&self) -> Result<(), AgentError> {
        info!("received agent status request");
        self.client
            .report_agent_status(ReportAgentStatusRequest {
                agent_id: self.agent_id.clone(),
                name: self.agent_name.clone(),
            })
            .await?;
        Ok(())
    }

    /// A task instance reported its pid: forward it, mark the instance
    /// running and start watching its health check if one is attached.
    pub async fn report_pid(&self, instance_id: &InstanceId, pid: u32) -> Result<(), AgentError> {
        info!(instance_id = %instance_id, pid, "received pid report, marking instance running");
        self.client
            .report_task_instance_pid(ReportTaskInstancePidRequest {
                task_instance_id: instance_id.clone(),
                pid,
            })
            .await?;
        self.client
            .report_task_instance_status(ReportTaskInstanceStatusRequest {
                task_instance_id: instance_id.clone(),
                status: AgentTaskStatus::Running.into(),
            })
            .await?;

        let config = self.watched.lock().unwrap().get(instance_id).cloned();
        if let Some(config) = config {
            self.start_watching(instance_id, config);
        }
        Ok(())
    }

    /// A task instance reported termination.
    pub async fn report_termination(&self, instance_id: &InstanceId) -> Result<(), AgentError> {
        info!(instance_id = %instance_id, "reporting instance termination");
        self.stop_instance_health_check(instance_id);
        self.client
            .report_task_instance_status(ReportTaskInstanceStatusRequest {
                task_instance_id: instance_id.clone(),
                status: AgentTaskStatus::Terminated.into(),
            })
            .await?;
        Ok(())
    }

    /// A task instance reported its exit code.
    pub async fn report_exit(
        &self,
        instance_id: &InstanceId,
        code: Option<i32>,
    ) -> Result<(), AgentError> {
        info!(instance_id = %instance_id, code = ?code, "reporting instance exit");
        self.stop_instance_health_check(instance_id);
        self.client
            .report_task_instance_status(ReportTaskInstanceStatusRequest {
                task_instance_id: instance_id.clone(),
                status: exit_status(code).into(),
            })
            .await?;
        Ok(())
    }

    /// Forward a structured event record emitted by a task instance.
    pub async fn report_event(
        &self,
        instance_id: &InstanceId,
        timestamp: i64,
        level: TaskEventLevel,
        payload: Value,
    ) -> Result<(), AgentError> {
        info!(instance_id = %instance_id, level = ?level, "forwarding instance event");
        let format = TaskEventFormat::for_payload(&payload);
        self.client
            .report_task_event(ReportTaskEventRequest {
                task_instance_id: instance_id.clone(),
                source: TaskEventSource::TaskInstance,
                timestamp,
                level,
                format,
                payload,
            })
            .await?;
        Ok(())
    }

    /// Record a passive heartbeat. Never calls the control plane.
    pub fn report_passive_health_check(&self, instance_id: &InstanceId) {
        debug!(instance_id = %instance_id, "recording passive health check heartbeat");
        self.passive.handle_ping(instance_id);
    }

    /// One health-check tick: collect outcomes from both managers, compute
    /// the delta against the previous tick and report only the transitions.
    /// A sustained failure produces exactly one report, not one per tick.
    pub(crate) async fn background_task(&self) {
        debug!("running health check tick");
        let prev = self.outcomes.lock().unwrap().clone();

        let mut latest = self.passive.health_check(&prev).await;
        latest.extend(self.ping.health_check(&prev).await);

        let delta = outcome_delta(&prev, &latest);
        *self.outcomes.lock().unwrap() = latest
            .iter()
            .map(|outcome| (outcome.instance_id.clone(), outcome.state))
            .collect();

        debug!(
            failed = delta.became_failed.len(),
            recovered = delta.became_successful.len(),
            "health check delta computed"
        );

        for instance_id in &delta.became_failed {
            let message = format!("task instance {instance_id} health check failed");
            info!(instance_id = %instance_id, "instance failed health check");
            if let Err(err) = self
                .report_status_and_event(
                    instance_id,
                    AgentTaskStatus::HealthCheckFailure,
                    TaskEventLevel::Error,
                    message,
                )
                .await
            {
                error!(instance_id = %instance_id, error = %err, "failed to report health check failure");
            }
        }

        for instance_id in &delta.became_successful {
            let message = format!("task instance {instance_id} back online");
            info!(instance_id = %instance_id, "instance recovered");
            if let Err(err) = self
                .report_status_and_event(
                    instance_id,
                    AgentTaskStatus::Running,
                    TaskEventLevel::Success,
                    message,
                )
                .await
            {
                error!(instance_id = %instance_id, error = %err, "failed to report instance recovery");
            }
        }
    }

    fn start_watching(&self, instance_id: &InstanceId, config: HealthCheckConfig) {
        info!(instance_id = %instance_id, "starting instance health check");
        match config {
            HealthCheckConfig::Passive(config) => {
                self.passive.watch_instance(instance_id.clone(), config)
            }
            HealthCheckConfig::Ping(config) => {
                self.ping.watch_instance(instance_id.clone(), config)
            }
        }
    }

    fn stop_instance_health_check(&self, instance_id: &InstanceId) {
        self.passive.remove_instance(instance_id);
        self.ping.remove_instance(instance_id);
        self.watched.lock().unwrap().remove(instance_id);
        self.outcomes.lock().unwrap().remove(instance_id);
    }

    async fn report_status_and_event(
        &self,
        instance_id: &InstanceId,
        status: AgentTaskStatus,
        level: TaskEventLevel,
        message: String,
    ) -> Result<(), AgentError> {
        info!(instance_id = %instance_id, status = ?status, level = ?level, "reporting instance status and event");
        self.client
            .report_task_instance_status(ReportTaskInstanceStatusRequest {
                task_instance_id: instance_id.clone(),
                status: status.into(),
            })
            .await?;
        self.client
            .report_task_event(ReportTaskEventRequest {
                task_instance_id: instance_id.clone(),
                source: TaskEventSource::TaskAgent,
                timestamp: Utc::now().timestamp_millis(),
                level,
                format: TaskEventFormat::String,
                payload: Value::String(message),
            })
            .await?;
        Ok(())
    }

    /// Replay journaled reports in file order, producing the same
    /// control-plane effects the live reporting path would have.
    async fn populate_offline_reports(
        &self,
        reports: Vec<OfflineReport>,
    ) -> Result<(), AgentError> {
        for report in reports {
            match report {
                OfflineReport::Pid {
                    instance_id,
                    pid,
                    timestamp,
                } => {
                    let message = format!(
                        "backfill pid report happened at {}",
                        format_report_time(timestamp)
                    );
                    info!(instance_id = %instance_id, pid, "replaying offline pid report");
                    self.client
                        .report_task_instance_pid(ReportTaskInstancePidRequest {
                            task_instance_id: instance_id.clone(),
                            pid,
                        })
                        .await?;
                    self.report_status_and_event(
                        &instance_id,
                        AgentTaskStatus::Running,
                        TaskEventLevel::Success,
                        message,
                    )
                    .await?;
                }
                OfflineReport::Exit {
                    instance_id,
                    code,
                    timestamp,
                } => {
                    let status = exit_status(code);
                    let message = format!(
                        "backfill exit report happened at {}",
                        format_report_time(timestamp)
                    );
                    info!(instance_id = %instance_id, code = ?code, "replaying offline exit report");
                    self.report_status_and_event(
                        &instance_id,
                        status,
                        TaskEventLevel::Success,
                        message,
                    )
                    .await?;
                }
                OfflineReport::Termination {
                    instance_id,
                    timestamp,
                } => {
                    let message = format!(
                        "backfill termination report happened at {}",
                        format_report_time(timestamp)
                    );
                    info!(instance_id = %instance_id, "replaying offline termination report");
                    self.report_status_and_event(
                        &instance_id,
                        AgentTaskStatus::Terminated,
                        TaskEventLevel::Success,
                        message,
                    )
                    .await?;
                }
                OfflineReport::Event {
                    instance_id,
                    level,
                    payload,
                    timestamp,
                } => {
                    info!(instance_id = %instance_id, level = ?level, "replaying offline event report");
                    let format = TaskEventFormat::for_payload(&payload);
                    self.client
                        .report_task_event(ReportTaskEventRequest {
                            task_instance_id: instance_id,
                            source: TaskEventSource::TaskInstance,
                            timestamp,
                            level,
                            format,
                            payload,
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Fetch the health checks configured for the given running instances
    /// and start watching each one.
    async fn initialize_running_instance_health_checks(
        &self,
        instances: &[TaskInstance],
    ) -> Result<(), AgentError> {
        let identifiers = instances
            .iter()
            .map(TaskInstance::task_identifier)
            .collect();
        let health_checks = self.client.list_health_checks(identifiers).await?;

        for entry in health_checks {
            let instance = instances
                .iter()
                .find(|i| i.task_id == entry.task_id && i.version == entry.version);
            let Some(instance) = instance else {
                // Should never happen: the listing was keyed by our instances.
                error!(
                    task_id = %entry.task_id,
                    version = entry.version,
                    "no running instance matches the health check listing"
                );
                continue;
            };
            self.watched
                .lock()
                .unwrap()
                .insert(instance.instance_id.clone(), entry.health_check.clone());
            self.start_watching(&instance.instance_id, entry.health_check);
        }
        Ok(())
    }

    #[cfg(test)]
    fn watched_config(&self, instance_id: &InstanceId) -> Option<HealthCheckConfig> {
        self.watched.lock().unwrap().get(instance_id).cloned()
    }
}

fn exit_status(code: Option<i32>) -> AgentTaskStatus {
    if code == Some(FAILURE_EXIT_CODE) {
        AgentTaskStatus::ExitFailure
    } else {
        AgentTaskStatus::ExitSuccess
    }
}

fn format_report_time(timestamp: i64) -> String {
    DateTime::from_timestamp_millis(timestamp)
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use taskhost_core::{
        PassiveHealthCheck, PingHealthCheck, TaskId, TaskInstanceStatus,
    };

    fn launch_request(
        instance_id: &str,
        cmd: &str,
        health_check: Option<HealthCheckConfig>,
    ) -> LaunchTaskInstanceRequest {
        LaunchTaskInstanceRequest {
            task_id: TaskId::new("etl"),
            version: 1,
            instance_id: InstanceId::new(instance_id),
            cmd: cmd.to_string(),
            cwd: "/tmp".to_string(),
            arguments: None,
            env: None,
            stdout: None,
            stderr: None,
            health_check,
        }
    }

    #[tokio::test]
    async fn test_launch_reports_launched_and_registers_health_check() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-1");
        let config = HealthCheckConfig::Passive(PassiveHealthCheck {
            period_in_ms: Some(4000),
        });

        agent
            .orchestrator
            .launch_task_instance(launch_request("i-1", "true", Some(config.clone())))
            .await
            .unwrap();

        assert_eq!(
            agent.client.reported_statuses(),
            vec![TaskInstanceStatus::Launched]
        );
        let events = agent.client.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, TaskEventLevel::Success);
        assert_eq!(events[0].source, TaskEventSource::TaskAgent);
        assert_eq!(agent.orchestrator.watched_config(&id), Some(config));
    }

    #[tokio::test]
    async fn test_launch_failure_reports_failed_to_launch() {
        let agent = build_test_agent();
        let blocker = agent.dir.path().join("blocker");
        tokio::fs::write(&blocker, "x").await.unwrap();

        let mut request = launch_request("i-1", "true", None);
        request.stdout = Some(blocker.join("out.log").display().to_string());

        agent
            .orchestrator
            .launch_task_instance(request)
            .await
            .unwrap();

        assert_eq!(
            agent.client.reported_statuses(),
            vec![TaskInstanceStatus::FailedToLaunch]
        );
        let events = agent.client.events.lock().unwrap();
        assert_eq!(events[0].level, TaskEventLevel::Error);
        let payload = events[0].payload.as_str().unwrap();
        assert!(payload.contains("failed to launch task instance i-1"));
        assert_eq!(agent.orchestrator.watched_config(&InstanceId::new("i-1")), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_nonexistent_pid_reports_terminated() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-1");

        // Register a watched instance so we can observe it being dropped.
        agent
            .orchestrator
            .watched
            .lock()
            .unwrap()
            .insert(id.clone(), HealthCheckConfig::Passive(PassiveHealthCheck { period_in_ms: None }));

        // Reap a real child to obtain a pid the OS no longer knows.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        agent
            .orchestrator
            .terminate_task_instance(TerminateTaskInstanceRequest {
                instance_id: id.clone(),
                pid: dead_pid,
            })
            .await
            .unwrap();

        assert_eq!(
            agent.client.reported_statuses(),
            vec![TaskInstanceStatus::Terminated]
        );
        assert_eq!(agent.orchestrator.watched_config(&id), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_running_pid_reports_terminating() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-1");

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();

        agent
            .orchestrator
            .terminate_task_instance(TerminateTaskInstanceRequest {
                instance_id: id.clone(),
                pid: child.id(),
            })
            .await
            .unwrap();

        assert_eq!(
            agent.client.reported_statuses(),
            vec![TaskInstanceStatus::Terminating]
        );
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_report_pid_marks_running_and_starts_watching() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-1");
        agent.orchestrator.watched.lock().unwrap().insert(
            id.clone(),
            HealthCheckConfig::Passive(PassiveHealthCheck { period_in_ms: Some(5000) }),
        );

        agent.orchestrator.report_pid(&id, 4242).await.unwrap();

        assert_eq!(agent.client.pids.lock().unwrap()[0].pid, 4242);
        assert_eq!(
            agent.client.reported_statuses(),
            vec![TaskInstanceStatus::Running]
        );
        let outcomes = agent.passive.health_check(&HashMap::new()).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].instance_id, id);
    }

    #[tokio::test]
    async fn test_report_exit_maps_sentinel_code() {
        let agent = build_test_agent();

        agent
            .orchestrator
            .report_exit(&InstanceId::new("i-1"), Some(-1))
            .await
            .unwrap();
        agent
            .orchestrator
            .report_exit(&InstanceId::new("i-2"), Some(0))
            .await
            .unwrap();
        agent
            .orchestrator
            .report_exit(&InstanceId::new("i-3"), None)
            .await
            .unwrap();

        assert_eq!(
            agent.client.reported_statuses(),
            vec![
                TaskInstanceStatus::ExitFailure,
                TaskInstanceStatus::ExitSuccess,
                TaskInstanceStatus::ExitSuccess,
            ]
        );
    }

    #[tokio::test]
    async fn test_report_termination_stops_watching() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-1");
        agent.passive.watch_instance(
            id.clone(),
            PassiveHealthCheck { period_in_ms: None },
        );

        agent.orchestrator.report_termination(&id).await.unwrap();

        assert_eq!(
            agent.client.reported_statuses(),
            vec![TaskInstanceStatus::Terminated]
        );
        assert!(agent.passive.health_check(&HashMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_report_event_forwards_payload_verbatim() {
        let agent = build_test_agent();
        let payload = serde_json::json!({"rows": 120});

        agent
            .orchestrator
            .report_event(
                &InstanceId::new("i-1"),
                1234,
                TaskEventLevel::Info,
                payload.clone(),
            )
            .await
            .unwrap();

        let events = agent.client.events.lock().unwrap();
        assert_eq!(events[0].payload, payload);
        assert_eq!(events[0].format, TaskEventFormat::Json);
        assert_eq!(events[0].source, TaskEventSource::TaskInstance);
        assert_eq!(events[0].timestamp, 1234);
    }

    #[tokio::test]
    async fn test_terminate_agent_signals_shutdown() {
        let mut agent = build_test_agent();
        agent.orchestrator.terminate_agent().await.unwrap();
        assert!(agent.shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_get_agent_status_reports_identity() {
        let agent = build_test_agent();
        agent.orchestrator.get_agent_status().await.unwrap();

        let reported = agent.client.agent_statuses.lock().unwrap();
        assert_eq!(reported[0].agent_id, AgentId::new("agent-1"));
        assert_eq!(reported[0].name, "test-agent");
    }

    #[tokio::test]
    async fn test_startup_replays_journal_in_order_and_deletes_file() {
        let agent = build_test_agent();
        let journal_path = agent.dir.path().join("offline.reports");
        tokio::fs::write(
            &journal_path,
            concat!(
                r#"{"type":"pid","instanceId":"i-1","pid":7,"timestamp":1000}"#,
                "\n",
                r#"{"type":"exit","instanceId":"i-2","code":-1,"timestamp":2000}"#,
                "\n",
                r#"{"type":"termination","instanceId":"i-3","timestamp":3000}"#,
                "\n",
                r#"{"type":"event","instanceId":"i-4","level":"warning","payload":"low disk","timestamp":4000}"#,
                "\n",
            ),
        )
        .await
        .unwrap();

        agent.orchestrator.init().await.unwrap();
        agent.orchestrator.terminate();

        assert_eq!(agent.client.pids.lock().unwrap()[0].pid, 7);
        assert_eq!(
            agent.client.reported_statuses(),
            vec![
                TaskInstanceStatus::Running,
                TaskInstanceStatus::ExitFailure,
                TaskInstanceStatus::Terminated,
            ]
        );
        let events = agent.client.events.lock().unwrap();
        // Three backfill events from the agent plus the verbatim instance event.
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].source, TaskEventSource::TaskInstance);
        assert_eq!(events[3].payload, Value::String("low disk".to_string()));
        assert_eq!(events[3].timestamp, 4000);

        assert!(!journal_path.exists());
    }

    #[tokio::test]
    async fn test_startup_with_missing_journal_reports_nothing() {
        let agent = build_test_agent();

        agent.orchestrator.init().await.unwrap();
        agent.orchestrator.terminate();

        assert!(agent.client.statuses.lock().unwrap().is_empty());
        assert!(agent.client.events.lock().unwrap().is_empty());
        assert!(agent.client.pids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_startup_rehydrates_health_checks_of_running_instances() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-9");
        let now = Utc::now();
        *agent.client.instances.lock().unwrap() = vec![TaskInstance {
            task_id: TaskId::new("web"),
            version: 2,
            instance_id: id.clone(),
            agent_id: AgentId::new("agent-1"),
            pid: Some(11),
            status: TaskInstanceStatus::Running,
            created_at: now,
            last_updated_at: now,
        }];
        *agent.client.health_checks.lock().unwrap() = vec![taskhost_client::TaskHealthCheck {
            task_id: TaskId::new("web"),
            version: 2,
            health_check: HealthCheckConfig::Ping(PingHealthCheck {
                domain: "http://localhost:9999".to_string(),
                path: None,
                period_in_ms: Some(5000),
            }),
        }];

        agent.orchestrator.init().await.unwrap();

        assert!(agent.orchestrator.watched_config(&id).is_some());
        // The ping manager was primed: a tick evaluates the instance.
        agent.orchestrator.background_task().await;
        assert!(agent
            .orchestrator
            .outcomes
            .lock()
            .unwrap()
            .contains_key(&id));
        agent.orchestrator.terminate();
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_failure_debounce_and_recovery() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-1");

        agent
            .orchestrator
            .launch_task_instance(launch_request(
                "i-1",
                "true",
                Some(HealthCheckConfig::Ping(PingHealthCheck {
                    domain: "http://x".to_string(),
                    path: None,
                    period_in_ms: Some(5000),
                })),
            ))
            .await
            .unwrap();
        agent.orchestrator.report_pid(&id, 4242).await.unwrap();

        // Three consecutive failed probes across three ticks produce one
        // failure report, on the third tick.
        agent.prober.set_succeed(false);
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(5001)).await;
            agent.orchestrator.background_task().await;
        }
        // A fourth failing tick must not report again.
        tokio::time::advance(Duration::from_millis(5001)).await;
        agent.orchestrator.background_task().await;

        // One successful probe recovers the instance with one report.
        agent.prober.set_succeed(true);
        tokio::time::advance(Duration::from_millis(5001)).await;
        agent.orchestrator.background_task().await;

        assert_eq!(
            agent.client.reported_statuses(),
            vec![
                TaskInstanceStatus::Launched,
                TaskInstanceStatus::Running,
                TaskInstanceStatus::HealthCheckFailure,
                TaskInstanceStatus::Running,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_heartbeats_keep_instance_healthy_across_ticks() {
        let agent = build_test_agent();
        let id = InstanceId::new("i-1");
        agent.orchestrator.watched.lock().unwrap().insert(
            id.clone(),
            HealthCheckConfig::Passive(PassiveHealthCheck { period_in_ms: Some(5000) }),
        );
        agent.orchestrator.report_pid(&id, 4242).await.unwrap();

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(5000)).await;
            agent.orchestrator.report_passive_health_check(&id);
            agent.orchestrator.background_task().await;
        }

        // Only the pid report's running status; no failure reports.
        assert_eq!(
            agent.client.reported_statuses(),
            vec![TaskInstanceStatus::Running]
        );

        // Heartbeats stop: the next tick past the tolerance window reports
        // one failure.
        tokio::time::advance(Duration::from_millis(7001)).await;
        agent.orchestrator.background_task().await;
        assert_eq!(
            agent.client.reported_statuses(),
            vec![
                TaskInstanceStatus::Running,
                TaskInstanceStatus::HealthCheckFailure,
            ]
        );
    }
}
