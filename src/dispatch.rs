//! Command dispatcher: bridges the durable command store and the live
//! connection registry.

use std::sync::Arc;

use crate::error::DispatchError;
use crate::hub::Hub;
use crate::model::AgentCommand;
use crate::protocol::Envelope;
use crate::store::ControlStore;

/// Turns a persisted pending command into a wire frame and hands it to the
/// addressed agent's outbound queue.
#[derive(Clone)]
pub struct Dispatcher {
    hub: Hub,
    store: Arc<dyn ControlStore>,
}

impl Dispatcher {
    pub fn new(hub: Hub, store: Arc<dyn ControlStore>) -> Self {
        Self { hub, store }
    }

    /// Deliver a command to its agent's outbound queue.
    ///
    /// On successful enqueue the command transitions pending → sent with
    /// sent_at=now. On any failure the command keeps its prior state, so a
    /// caller-level retry is safe; the dispatcher never retries itself.
    pub async fn dispatch(&self, command: &AgentCommand) -> Result<(), DispatchError> {
        let envelope = Envelope::command(command)?;
        let frame = serde_json::to_string(&envelope)?;

        self.hub.send_frame(&command.agent_id, frame).await?;

        let rows = self
            .store
            .mark_sent(&command.command_id, &command.agent_id)
            .await?;
        if rows == 0 {
            // Enqueued, but the row was not pending anymore (concurrent
            // retry or out-of-band mutation). The agent will still process
            // the frame; lifecycle reports reconcile the row from here.
            tracing::warn!(
                command_id = %command.command_id,
                agent_id = %command.agent_id,
                "Dispatched command was not in pending state"
            );
        } else {
            tracing::info!(
                command_id = %command.command_id,
                agent_id = %command.agent_id,
                action = %command.action,
                "Dispatched command"
            );
        }
        Ok(())
    }
}
