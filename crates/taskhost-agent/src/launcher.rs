//! Detached process launching for task instances.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info};

use taskhost_core::{AgentId, LaunchTaskInstanceRequest};

use crate::metrics::MetricsRecorder;

/// Ambient variables a child inherits from the agent. Everything else in the
/// agent's environment stays private.
const ENV_ALLOWLIST: &[&str] = &["SHELL", "PATH", "USER", "HOME", "PWD", "PYTHONPATH"];

const LAUNCH_TASK_INSTANCE: &str = "LaunchTaskInstance";
const LAUNCH_FAILURE_COUNT: &str = "LaunchFailure.Count";

/// Launch inputs supplied by the agent rather than the request.
pub struct LaunchOptions {
    /// Heartbeat period exported to the child, only when a passive health
    /// check is attached.
    pub passive_health_check_duration: Option<u64>,

    /// Journal path exported to the child for offline reporting.
    pub offline_report_path: PathBuf,
}

/// A launch that failed before the spawn was requested.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to prepare output destination {path}: {source}")]
    Stdio {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Turns a launch request into a running, detached OS process.
///
/// The launcher's contract ends once the OS has accepted the spawn request:
/// the child is placed in its own process group, its handle is dropped, and
/// the agent never waits on it. Whether the instance is actually up is
/// confirmed later through the reporter surface.
pub struct ProcessLauncher {
    agent_id: AgentId,
    metrics: Arc<dyn MetricsRecorder>,
}

impl ProcessLauncher {
    pub fn new(agent_id: AgentId, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self { agent_id, metrics }
    }

    /// Request that the instance's process start.
    ///
    /// Only input/IO problems (an output file that cannot be created or
    /// opened) fail the launch; a spawn refusal from the OS is logged and
    /// counted, matching the fire-and-forget contract.
    pub async fn launch(
        &self,
        request: &LaunchTaskInstanceRequest,
        options: &LaunchOptions,
    ) -> Result<(), LaunchError> {
        info!(
            task_id = %request.task_id,
            version = request.version,
            instance_id = %request.instance_id,
            cmd = %request.cmd,
            cwd = %request.cwd,
            stdout = request.stdout.as_deref().unwrap_or("<discard>"),
            stderr = request.stderr.as_deref().unwrap_or("<discard>"),
            "launching task instance"
        );

        let started = Instant::now();
        let stdout = build_stdio(request.stdout.as_deref()).await?;
        let stderr = build_stdio(request.stderr.as_deref()).await?;
        let env = self.build_environment(request, options);

        // The command string may rely on shell features; arguments are
        // appended to it and the whole line runs through the shell.
        let mut command_line = request.cmd.clone();
        for argument in request.arguments.iter().flatten() {
            command_line.push(' ');
            command_line.push_str(argument);
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&command_line)
            .current_dir(&request.cwd)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        match command.spawn() {
            Ok(child) => {
                // Not necessarily the task's own pid; the instance reports
                // its real pid through the reporter surface.
                info!(
                    instance_id = %request.instance_id,
                    pid = child.id(),
                    "spawn requested for task instance"
                );
            }
            Err(err) => {
                error!(
                    instance_id = %request.instance_id,
                    error = %err,
                    "OS rejected the spawn request"
                );
                self.metrics.increment_counter(LAUNCH_FAILURE_COUNT);
            }
        }

        self.metrics
            .observe_duration(LAUNCH_TASK_INSTANCE, started.elapsed());
        Ok(())
    }

    fn build_environment(
        &self,
        request: &LaunchTaskInstanceRequest,
        options: &LaunchOptions,
    ) -> HashMap<String, String> {
        // Layering order matters: ambient allow-list, then the task's own
        // environment, then agent-injected identity. Later layers win.
        let mut env: HashMap<String, String> = ENV_ALLOWLIST
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();

        if let Some(task_env) = &request.env {
            env.extend(task_env.clone());
        }

        env.insert(
            "TASK_INSTANCE_ID".to_string(),
            request.instance_id.as_str().to_string(),
        );
        env.insert("TASK_ID".to_string(), request.task_id.as_str().to_string());
        env.insert("TASK_VERSION".to_string(), request.version.to_string());
        env.insert("AGENT_ID".to_string(), self.agent_id.as_str().to_string());
        env.insert(
            "OFFLINE_REPORT_PATH".to_string(),
            options.offline_report_path.display().to_string(),
        );
        if let Some(duration) = options.passive_health_check_duration {
            env.insert(
                "PASSIVE_HEALTH_CHECK_DURATION".to_string(),
                duration.to_string(),
            );
        }
        env
    }
}

/// Resolve one stdio destination: append to the given file (creating parent
/// directories), or discard.
async fn build_stdio(path: Option<&str>) -> Result<Stdio, LaunchError> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };

    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| LaunchError::Stdio {
                path: path.to_string(),
                source,
            })?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LaunchError::Stdio {
            path: path.to_string(),
            source,
        })?;
    Ok(Stdio::from(file))
}
