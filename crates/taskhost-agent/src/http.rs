//! HTTP surface of the agent.
//!
//! Two groups of routes:
//! - `/task-reporter/*` — called by task-instance-side reporters on this
//!   host (pid, termination, exit, event, passive heartbeat).
//! - `/task-agent/command` — intake for pushed control-plane commands,
//!   which are serialized through the dispatcher's queue.
//!
//! All success responses are `200` with an empty JSON object; malformed
//! bodies are rejected by extraction before any handler runs.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use taskhost_core::{AgentCommand, InstanceId, TaskEventLevel};

use crate::dispatch::CommandDispatcher;
use crate::orchestrator::{AgentError, TaskInstanceOrchestrator};

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TaskInstanceOrchestrator>,
    pub dispatcher: Arc<CommandDispatcher>,
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Reporter surface for task instances
        .route("/task-reporter/pid", post(report_pid))
        .route("/task-reporter/termination", post(report_termination))
        .route("/task-reporter/exit", post(report_exit))
        .route("/task-reporter/event", post(report_event))
        .route(
            "/task-reporter/passive-health-check",
            post(report_passive_health_check),
        )
        // Control-plane command intake
        .route("/task-agent/command", post(accept_command))
        // Observability
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportPidBody {
    task_instance_id: InstanceId,
    pid: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportTerminationBody {
    task_instance_id: InstanceId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportExitBody {
    task_instance_id: InstanceId,
    #[serde(default)]
    code: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportEventBody {
    task_instance_id: InstanceId,
    timestamp: i64,
    level: TaskEventLevel,
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportPassiveHealthCheckBody {
    task_instance_id: InstanceId,
}

fn reply(result: Result<(), AgentError>) -> impl IntoResponse {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({}))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

/// POST /task-reporter/pid
async fn report_pid(
    State(state): State<AppState>,
    Json(body): Json<ReportPidBody>,
) -> impl IntoResponse {
    info!(instance_id = %body.task_instance_id, pid = body.pid, "received pid report");
    reply(
        state
            .orchestrator
            .report_pid(&body.task_instance_id, body.pid)
            .await,
    )
}

/// POST /task-reporter/termination
async fn report_termination(
    State(state): State<AppState>,
    Json(body): Json<ReportTerminationBody>,
) -> impl IntoResponse {
    info!(instance_id = %body.task_instance_id, "received termination report");
    reply(
        state
            .orchestrator
            .report_termination(&body.task_instance_id)
            .await,
    )
}

/// POST /task-reporter/exit
async fn report_exit(
    State(state): State<AppState>,
    Json(body): Json<ReportExitBody>,
) -> impl IntoResponse {
    info!(instance_id = %body.task_instance_id, code = ?body.code, "received exit report");
    reply(
        state
            .orchestrator
            .report_exit(&body.task_instance_id, body.code)
            .await,
    )
}

/// POST /task-reporter/event
async fn report_event(
    State(state): State<AppState>,
    Json(body): Json<ReportEventBody>,
) -> impl IntoResponse {
    info!(instance_id = %body.task_instance_id, "received event report");
    reply(
        state
            .orchestrator
            .report_event(
                &body.task_instance_id,
                body.timestamp,
                body.level,
                body.payload,
            )
            .await,
    )
}

/// POST /task-reporter/passive-health-check
async fn report_passive_health_check(
    State(state): State<AppState>,
    Json(body): Json<ReportPassiveHealthCheckBody>,
) -> impl IntoResponse {
    state
        .orchestrator
        .report_passive_health_check(&body.task_instance_id);
    (StatusCode::OK, Json(json!({})))
}

/// POST /task-agent/command
async fn accept_command(
    State(state): State<AppState>,
    Json(command): Json<AgentCommand>,
) -> impl IntoResponse {
    state.dispatcher.dispatch(command);
    (StatusCode::OK, Json(json!({})))
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
