//! Status enums for task instances.
//!
//! Two enums cover the same lifecycle at different levels of authority:
//! [`TaskInstanceStatus`] is the full control-plane enumeration, while
//! [`AgentTaskStatus`] is the strictly smaller subset an agent is allowed to
//! report. Keeping them separate means an agent cannot emit a value outside
//! its authority by construction.

use serde::{Deserialize, Serialize};

/// Status of a task instance as the control plane records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskInstanceStatus {
    /// Instance assigned to an agent but not yet launched.
    Assigned,
    /// Launch request accepted by the agent.
    Launched,
    /// Agent could not start the instance process.
    FailedToLaunch,
    /// Instance confirmed up (pid reported or health recovered).
    Running,
    /// Agent delivered a termination signal; instance shutting down.
    Terminating,
    /// Agent could not deliver the termination signal.
    AgentTerminationFailed,
    /// Instance reported termination.
    Terminated,
    /// Instance exited cleanly.
    #[serde(rename = "exit(0)")]
    ExitSuccess,
    /// Instance exited with the failure sentinel code.
    #[serde(rename = "exit(1)")]
    ExitFailure,
    /// Instance failed its configured health check.
    HealthCheckFailure,
    /// Control plane lost track of the instance (agent gone).
    Lost,
}

/// The subset of [`TaskInstanceStatus`] an agent is authorized to report.
///
/// Transitions are reported, never enforced locally: the agent emits one
/// report per observed event and the control plane is the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskStatus {
    Launched,
    FailedToLaunch,
    Running,
    Terminating,
    AgentTerminationFailed,
    Terminated,
    #[serde(rename = "exit(0)")]
    ExitSuccess,
    #[serde(rename = "exit(1)")]
    ExitFailure,
    HealthCheckFailure,
}

impl AgentTaskStatus {
    /// Returns true if the status ends the instance's life on this agent.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FailedToLaunch | Self::Terminated | Self::ExitSuccess | Self::ExitFailure
        )
    }
}

impl From<AgentTaskStatus> for TaskInstanceStatus {
    fn from(status: AgentTaskStatus) -> Self {
        match status {
            AgentTaskStatus::Launched => Self::Launched,
            AgentTaskStatus::FailedToLaunch => Self::FailedToLaunch,
            AgentTaskStatus::Running => Self::Running,
            AgentTaskStatus::Terminating => Self::Terminating,
            AgentTaskStatus::AgentTerminationFailed => Self::AgentTerminationFailed,
            AgentTaskStatus::Terminated => Self::Terminated,
            AgentTaskStatus::ExitSuccess => Self::ExitSuccess,
            AgentTaskStatus::ExitFailure => Self::ExitFailure,
            AgentTaskStatus::HealthCheckFailure => Self::HealthCheckFailure,
        }
    }
}
