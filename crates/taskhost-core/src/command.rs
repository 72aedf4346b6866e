//! Push commands the control plane sends to an agent.

use crate::{AgentId, HealthCheckConfig, InstanceId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request to launch one task instance on this agent.
///
/// `cmd`, `cwd`, `arguments`, `env` values and the stdio paths may contain
/// `${...}` placeholders resolved on the agent before launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTaskInstanceRequest {
    pub task_id: TaskId,
    pub version: u32,
    #[serde(rename = "taskInstanceId")]
    pub instance_id: InstanceId,
    pub cmd: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,
}

/// Request to terminate one task instance by pid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateTaskInstanceRequest {
    #[serde(rename = "taskInstanceId")]
    pub instance_id: InstanceId,
    pub pid: u32,
}

/// A pushed control-plane command.
///
/// Commands carry an optional target agent id; a command addressed to a
/// different agent is ignored by the receiver, an absent id is a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentCommand {
    #[serde(rename_all = "camelCase")]
    LaunchTaskInstance {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        request: LaunchTaskInstanceRequest,
    },
    #[serde(rename_all = "camelCase")]
    TerminateTaskInstance {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        request: TerminateTaskInstanceRequest,
    },
    #[serde(rename_all = "camelCase")]
    TerminateAgent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },
    #[serde(rename_all = "camelCase")]
    GetAgentStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },
}

impl AgentCommand {
    /// The agent the command is addressed to, if any.
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Self::LaunchTaskInstance { agent_id, .. }
            | Self::TerminateTaskInstance { agent_id, .. }
            | Self::TerminateAgent { agent_id }
            | Self::GetAgentStatus { agent_id } => agent_id.as_ref(),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LaunchTaskInstance { .. } => "launch-task-instance",
            Self::TerminateTaskInstance { .. } => "terminate-task-instance",
            Self::TerminateAgent { .. } => "terminate-agent",
            Self::GetAgentStatus { .. } => "get-agent-status",
        }
    }
}
