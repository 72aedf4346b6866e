//! Offline reports and task event metadata.
//!
//! When a task instance's reporter cannot reach the agent, or the agent
//! cannot reach the control plane, reports are appended to a local journal as
//! newline-delimited JSON and replayed at the next agent startup.

use crate::InstanceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exit code a task instance reports to mark a failed run.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Severity of a task event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEventLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Encoding of a task event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEventFormat {
    String,
    Json,
}

impl TaskEventFormat {
    /// Derive the format from the payload shape.
    pub fn for_payload(payload: &Value) -> Self {
        if payload.is_string() {
            Self::String
        } else {
            Self::Json
        }
    }
}

/// Origin of a task event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEventSource {
    #[serde(rename = "task-agent")]
    TaskAgent,
    #[serde(rename = "task-instance")]
    TaskInstance,
}

/// One journaled record, written by a task-instance-side reporter while the
/// live reporting path is unavailable. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OfflineReport {
    #[serde(rename_all = "camelCase")]
    Pid {
        instance_id: InstanceId,
        pid: u32,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Exit {
        instance_id: InstanceId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Termination {
        instance_id: InstanceId,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        instance_id: InstanceId,
        level: TaskEventLevel,
        payload: Value,
        timestamp: i64,
    },
}

impl OfflineReport {
    /// The instance the report is about.
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            Self::Pid { instance_id, .. }
            | Self::Exit { instance_id, .. }
            | Self::Termination { instance_id, .. }
            | Self::Event { instance_id, .. } => instance_id,
        }
    }

    /// When the report was written, epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Pid { timestamp, .. }
            | Self::Exit { timestamp, .. }
            | Self::Termination { timestamp, .. }
            | Self::Event { timestamp, .. } => *timestamp,
        }
    }
}
