//! HTTP implementation of the control-plane client.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use taskhost_core::{AgentId, TaskIdentifier, TaskInstance};

use crate::error::ClientError;
use crate::types::{
    ListHealthChecksRequest, ListHealthChecksResponse, ListRunningInstancesResponse,
    ReportAgentStatusRequest, ReportTaskEventRequest, ReportTaskInstancePidRequest,
    ReportTaskInstanceStatusRequest, TaskHealthCheck,
};
use crate::ControlPlaneClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Control-plane client over HTTP+JSON.
pub struct HttpControlPlaneClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpControlPlaneClient {
    /// Create a new client against the given base URL.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let inner = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST request");

        let response = self.inner.post(&url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ControlPlaneClient for HttpControlPlaneClient {
    async fn list_running_instances(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<TaskInstance>, ClientError> {
        let url = format!("{}/task/running-task-instances", self.base_url);
        debug!(url = %url, agent_id = %agent_id, "listing running task instances");

        let response = self
            .inner
            .get(&url)
            .query(&[("agentId", agent_id.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status().as_u16(),
                path: "/task/running-task-instances".to_string(),
            });
        }
        let body: ListRunningInstancesResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        Ok(body.task_instances)
    }

    async fn list_health_checks(
        &self,
        task_identifiers: Vec<TaskIdentifier>,
    ) -> Result<Vec<TaskHealthCheck>, ClientError> {
        let request = ListHealthChecksRequest { task_identifiers };
        let response: ListHealthChecksResponse =
            self.post_json("/task/health-checks", &request).await?;
        Ok(response.results)
    }

    async fn report_task_instance_pid(
        &self,
        request: ReportTaskInstancePidRequest,
    ) -> Result<(), ClientError> {
        debug!(instance_id = %request.task_instance_id, pid = request.pid, "reporting instance pid");
        let _: serde_json::Value = self.post_json("/task/instance-pid", &request).await?;
        Ok(())
    }

    async fn report_task_instance_status(
        &self,
        request: ReportTaskInstanceStatusRequest,
    ) -> Result<(), ClientError> {
        debug!(instance_id = %request.task_instance_id, status = ?request.status, "reporting instance status");
        let _: serde_json::Value = self.post_json("/task/instance-status", &request).await?;
        Ok(())
    }

    async fn report_task_event(&self, request: ReportTaskEventRequest) -> Result<(), ClientError> {
        debug!(instance_id = %request.task_instance_id, level = ?request.level, "reporting task event");
        let _: serde_json::Value = self.post_json("/task/instance-event", &request).await?;
        Ok(())
    }

    async fn report_agent_status(
        &self,
        request: ReportAgentStatusRequest,
    ) -> Result<(), ClientError> {
        debug!(agent_id = %request.agent_id, "reporting agent status");
        let _: serde_json::Value = self.post_json("/task/agent-status", &request).await?;
        Ok(())
    }
}
