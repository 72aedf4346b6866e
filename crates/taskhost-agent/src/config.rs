//! Agent configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use taskhost_core::{validate_tolerance_buffer, AgentId, ToleranceBufferError};

use crate::vars::SubstitutionConfig;

/// Environment variable overriding the passive tolerance buffer.
pub const TOLERANCE_BUFFER_ENV: &str = "PASSIVE_HEALTH_CHECK_TOLERANCE_BUFFER";

const OFFLINE_REPORT_FILE: &str = "offline-reports.reports";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {TOLERANCE_BUFFER_ENV} value {0:?}")]
    InvalidToleranceBuffer(String),

    #[error(transparent)]
    ToleranceBuffer(#[from] ToleranceBufferError),
}

/// Agent configuration.
pub struct AgentConfig {
    /// Agent identifier registered with the control plane.
    pub agent_id: AgentId,

    /// Human-readable agent name.
    pub agent_name: String,

    /// Base URL of the control plane.
    pub service_base_url: String,

    /// Address the reporter/command HTTP surface binds to.
    pub listen_addr: SocketAddr,

    /// Directory holding per-agent stdio and journal files.
    pub agent_dir: PathBuf,

    /// Period of the recurring health-check tick.
    pub tick_period: Duration,

    /// Grace added on top of a passive health check's period.
    pub passive_tolerance_buffer: Duration,
}

impl AgentConfig {
    fn instance_dir(&self) -> PathBuf {
        self.agent_dir.join(self.agent_id.as_str())
    }

    pub fn stdout_dir(&self) -> PathBuf {
        self.instance_dir().join("stdout")
    }

    pub fn stderr_dir(&self) -> PathBuf {
        self.instance_dir().join("stderr")
    }

    pub fn offline_report_path(&self) -> PathBuf {
        self.instance_dir().join(OFFLINE_REPORT_FILE)
    }

    /// Values substituted into launch requests.
    pub fn substitution_config(&self) -> SubstitutionConfig {
        SubstitutionConfig {
            home: self.agent_dir.display().to_string(),
            project_dir: self.agent_dir.display().to_string(),
            stdout_dir: self.stdout_dir().display().to_string(),
            stderr_dir: self.stderr_dir().display().to_string(),
        }
    }
}

/// Resolve the passive tolerance buffer from an optional environment
/// override and the configured default, enforcing the policy minimum.
pub fn resolve_tolerance_buffer(
    env_value: Option<&str>,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let buffer_ms = match env_value {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidToleranceBuffer(raw.to_string()))?,
        None => default_ms,
    };
    Ok(Duration::from_millis(validate_tolerance_buffer(buffer_ms)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig {
            agent_id: AgentId::new("agent-1"),
            agent_name: "agent".to_string(),
            service_base_url: "http://localhost:3000".to_string(),
            listen_addr: "127.0.0.1:4000".parse().unwrap(),
            agent_dir: PathBuf::from("/var/lib/taskhost"),
            tick_period: Duration::from_millis(5000),
            passive_tolerance_buffer: Duration::from_millis(2000),
        }
    }

    #[test]
    fn test_paths_are_scoped_by_agent_id() {
        let config = config();
        assert_eq!(
            config.offline_report_path(),
            PathBuf::from("/var/lib/taskhost/agent-1/offline-reports.reports")
        );
        assert_eq!(
            config.stdout_dir(),
            PathBuf::from("/var/lib/taskhost/agent-1/stdout")
        );
        assert_eq!(
            config.stderr_dir(),
            PathBuf::from("/var/lib/taskhost/agent-1/stderr")
        );
    }

    #[test]
    fn test_tolerance_buffer_resolution() {
        assert_eq!(
            resolve_tolerance_buffer(None, 2000).unwrap(),
            Duration::from_millis(2000)
        );
        assert_eq!(
            resolve_tolerance_buffer(Some("3500"), 2000).unwrap(),
            Duration::from_millis(3500)
        );
        assert!(matches!(
            resolve_tolerance_buffer(Some("500"), 2000),
            Err(ConfigError::ToleranceBuffer(_))
        ));
        assert!(matches!(
            resolve_tolerance_buffer(Some("2.5s"), 2000),
            Err(ConfigError::InvalidToleranceBuffer(_))
        ));
    }
}
