//! Push-command dispatch.
//!
//! Control-plane-pushed commands are serialized through an
//! [`AsyncEventQueue`]: at most one command executes at a time, in arrival
//! order, regardless of how they reach the agent.

use std::sync::Arc;

use tracing::{error, info};

use taskhost_core::{AgentCommand, AgentId};

use crate::orchestrator::TaskInstanceOrchestrator;
use crate::queue::{AsyncEventQueue, AsyncEventQueueOptions};

/// Filters pushed commands by target agent and feeds them to the
/// orchestrator, one at a time.
pub struct CommandDispatcher {
    agent_id: AgentId,
    queue: AsyncEventQueue<AgentCommand>,
}

impl CommandDispatcher {
    pub fn new(agent_id: AgentId, orchestrator: Arc<TaskInstanceOrchestrator>) -> Self {
        let queue = AsyncEventQueue::new(
            AsyncEventQueueOptions {
                name: Some("agent-commands".to_string()),
                ..Default::default()
            },
            move |command: AgentCommand| {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move { apply(orchestrator, command).await })
            },
        );
        queue.on_error(|command: AgentCommand, err| {
            error!(command = command.kind(), error = %err, "pushed command failed");
        });

        Self { agent_id, queue }
    }

    /// Accept a pushed command. Commands addressed to a different agent are
    /// ignored; an absent target is a broadcast.
    pub fn dispatch(&self, command: AgentCommand) {
        match command.agent_id() {
            Some(target) if target != &self.agent_id => {
                info!(
                    command = command.kind(),
                    target = %target,
                    "ignoring command sent to a different agent"
                );
            }
            _ => {
                info!(command = command.kind(), "enqueueing pushed command");
                let _ = self.queue.enqueue(command);
            }
        }
    }

    /// Close the queue and wait for in-flight command processing to finish.
    pub async fn terminate(&self) {
        self.queue.terminate().await;
    }
}

async fn apply(
    orchestrator: Arc<TaskInstanceOrchestrator>,
    command: AgentCommand,
) -> Result<(), crate::queue::HandlerError> {
    info!(command = command.kind(), "processing pushed command");
    match command {
        AgentCommand::LaunchTaskInstance { request, .. } => {
            orchestrator.launch_task_instance(request).await?
        }
        AgentCommand::TerminateTaskInstance { request, .. } => {
            orchestrator.terminate_task_instance(request).await?
        }
        AgentCommand::TerminateAgent { .. } => orchestrator.terminate_agent().await?,
        AgentCommand::GetAgentStatus { .. } => orchestrator.get_agent_status().await?,
    }
    Ok(())
}
