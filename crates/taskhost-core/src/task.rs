//! Task identifier and task instance types.

use crate::{AgentId, InstanceId, TaskId, TaskInstanceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a task definition (not a running instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdentifier {
    pub task_id: TaskId,
    pub version: u32,
}

/// One launched execution of a task, tracked by the control plane and
/// attributed to a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstance {
    /// Task definition this instance was launched from.
    pub task_id: TaskId,

    /// Version of the task definition.
    pub version: u32,

    /// Globally unique instance identifier, assigned before launch.
    pub instance_id: InstanceId,

    /// Agent the instance is attributed to.
    pub agent_id: AgentId,

    /// OS pid, once the instance has reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Last status recorded by the control plane.
    pub status: TaskInstanceStatus,

    /// When the instance was created.
    pub created_at: DateTime<Utc>,

    /// When the instance last changed.
    pub last_updated_at: DateTime<Utc>,
}

impl TaskInstance {
    /// The task definition identifier for this instance.
    pub fn task_identifier(&self) -> TaskIdentifier {
        TaskIdentifier {
            task_id: self.task_id.clone(),
            version: self.version,
        }
    }
}
