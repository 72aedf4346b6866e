//! Control-plane client for the Taskhost agent.
//!
//! The agent consumes the control plane through the [`ControlPlaneClient`]
//! capability; [`HttpControlPlaneClient`] is the production implementation.
//! Tests substitute their own recording implementations.

use async_trait::async_trait;
use taskhost_core::{AgentId, TaskIdentifier, TaskInstance};

pub mod error;
pub mod http;
pub mod types;

pub use error::ClientError;
pub use http::HttpControlPlaneClient;
pub use types::{
    ListHealthChecksRequest, ListHealthChecksResponse, ListRunningInstancesResponse,
    ReportAgentStatusRequest, ReportTaskEventRequest, ReportTaskInstancePidRequest,
    ReportTaskInstanceStatusRequest, TaskHealthCheck,
};

/// The control-plane operations an agent needs.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Task instances currently attributed to the given agent.
    async fn list_running_instances(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<TaskInstance>, ClientError>;

    /// Health-check configurations for the given task definitions.
    async fn list_health_checks(
        &self,
        task_identifiers: Vec<TaskIdentifier>,
    ) -> Result<Vec<TaskHealthCheck>, ClientError>;

    /// Record the OS pid of a task instance.
    async fn report_task_instance_pid(
        &self,
        request: ReportTaskInstancePidRequest,
    ) -> Result<(), ClientError>;

    /// Record a status transition of a task instance.
    async fn report_task_instance_status(
        &self,
        request: ReportTaskInstanceStatusRequest,
    ) -> Result<(), ClientError>;

    /// Forward a structured task event record.
    async fn report_task_event(&self, request: ReportTaskEventRequest) -> Result<(), ClientError>;

    /// Report agent identity/liveness.
    async fn report_agent_status(
        &self,
        request: ReportAgentStatusRequest,
    ) -> Result<(), ClientError>;
}
