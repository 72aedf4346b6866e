//! Taskhost Agent Daemon

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;
mod health;
mod http;
mod journal;
mod launcher;
mod metrics;
mod orchestrator;
mod queue;
mod vars;

use taskhost_client::HttpControlPlaneClient;
use taskhost_core::AgentId;

use config::AgentConfig;
use dispatch::CommandDispatcher;
use health::{PassiveHealthCheckManager, PingHealthCheckManager, ReqwestProber};
use http::{create_router, AppState};
use launcher::ProcessLauncher;
use metrics::LogMetricsRecorder;
use orchestrator::{OrchestratorProps, TaskInstanceOrchestrator};
use vars::VariableSubstitution;

#[derive(Parser, Debug)]
#[command(name = "taskhost-agent", about = "Host-resident task agent")]
struct Args {
    /// Agent identifier registered with the control plane.
    #[arg(long)]
    agent_id: String,

    /// Human-readable agent name.
    #[arg(long, default_value = "taskhost-agent")]
    agent_name: String,

    /// Base URL of the control plane.
    #[arg(long, default_value = "http://localhost:3000")]
    service_url: String,

    /// Address the reporter/command HTTP surface binds to.
    #[arg(long, default_value = "127.0.0.1:4000")]
    listen: SocketAddr,

    /// Directory holding per-agent stdio and journal files.
    #[arg(long, default_value = "/var/lib/taskhost")]
    agent_dir: PathBuf,

    /// Health-check tick period in milliseconds.
    #[arg(long, default_value_t = 5000)]
    tick_period_ms: u64,

    /// Passive health-check tolerance buffer in milliseconds.
    #[arg(long, default_value_t = 2000)]
    tolerance_buffer_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let passive_tolerance_buffer = config::resolve_tolerance_buffer(
        std::env::var(config::TOLERANCE_BUFFER_ENV).ok().as_deref(),
        args.tolerance_buffer_ms,
    )?;
    let config = AgentConfig {
        agent_id: AgentId::new(args.agent_id),
        agent_name: args.agent_name,
        service_base_url: args.service_url,
        listen_addr: args.listen,
        agent_dir: args.agent_dir,
        tick_period: Duration::from_millis(args.tick_period_ms),
        passive_tolerance_buffer,
    };

    info!(
        agent_id = %config.agent_id,
        control_plane = %config.service_base_url,
        "starting taskhost agent"
    );

    tokio::fs::create_dir_all(config.stdout_dir()).await?;
    tokio::fs::create_dir_all(config.stderr_dir()).await?;

    let client = Arc::new(HttpControlPlaneClient::new(&config.service_base_url)?);
    let metrics = Arc::new(LogMetricsRecorder);
    let passive = Arc::new(PassiveHealthCheckManager::new(
        config.passive_tolerance_buffer,
    ));
    let ping = Arc::new(PingHealthCheckManager::new(Arc::new(ReqwestProber::new()?)));
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let orchestrator = Arc::new(TaskInstanceOrchestrator::new(OrchestratorProps {
        agent_id: config.agent_id.clone(),
        agent_name: config.agent_name.clone(),
        client,
        launcher: ProcessLauncher::new(config.agent_id.clone(), metrics),
        substitution: VariableSubstitution::new(config.substitution_config()),
        passive,
        ping,
        offline_report_path: config.offline_report_path(),
        tick_period: config.tick_period,
        shutdown: shutdown_tx,
    }));
    orchestrator.init().await?;

    let dispatcher = Arc::new(CommandDispatcher::new(
        config.agent_id.clone(),
        Arc::clone(&orchestrator),
    ));

    let app = create_router(AppState {
        orchestrator: Arc::clone(&orchestrator),
        dispatcher: Arc::clone(&dispatcher),
    });
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "agent accepting reporter and command requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
                _ = shutdown_rx.recv() => info!("received self-termination request"),
            }
        })
        .await?;

    info!("terminating agent");
    dispatcher.terminate().await;
    orchestrator.terminate();
    info!("agent closed");
    Ok(())
}
