//! Request/response shapes of the control plane's agent-facing API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskhost_core::{
    AgentId, HealthCheckConfig, InstanceId, TaskEventFormat, TaskEventLevel, TaskEventSource,
    TaskId, TaskIdentifier, TaskInstance, TaskInstanceStatus,
};

/// Body of `POST /task/instance-pid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTaskInstancePidRequest {
    pub task_instance_id: InstanceId,
    pub pid: u32,
}

/// Body of `POST /task/instance-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTaskInstanceStatusRequest {
    pub task_instance_id: InstanceId,
    pub status: TaskInstanceStatus,
}

/// Body of `POST /task/instance-event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTaskEventRequest {
    pub task_instance_id: InstanceId,
    pub source: TaskEventSource,
    /// Epoch milliseconds at which the event occurred.
    pub timestamp: i64,
    pub level: TaskEventLevel,
    pub format: TaskEventFormat,
    pub payload: Value,
}

/// Body of `POST /task/agent-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAgentStatusRequest {
    pub agent_id: AgentId,
    pub name: String,
}

/// Response of `GET /task/running-task-instances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRunningInstancesResponse {
    pub task_instances: Vec<TaskInstance>,
}

/// Body of `POST /task/health-checks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListHealthChecksRequest {
    pub task_identifiers: Vec<TaskIdentifier>,
}

/// One health-check configuration attached to a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHealthCheck {
    pub task_id: TaskId,
    pub version: u32,
    pub health_check: HealthCheckConfig,
}

/// Response of `POST /task/health-checks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListHealthChecksResponse {
    pub results: Vec<TaskHealthCheck>,
}
