//! Handlers for agent → server protocol messages.
//!
//! All payloads are decoded defensively: a malformed payload is logged and
//! dropped without side effects, and the connection stays open. Database
//! failures here are logged only; the protocol has no error-reply frame.

use crate::api::AppState;
use crate::protocol::{
    AckPayload, CompletePayload, Envelope, FailedPayload, HeartbeatPayload, MessageType,
    StatusPayload,
};

/// Route one decoded envelope from an agent's read pump.
pub async fn route(state: &AppState, agent_id: &str, envelope: Envelope) {
    match envelope.kind {
        MessageType::Heartbeat => handle_heartbeat(state, agent_id, envelope).await,
        MessageType::Ack => handle_ack(state, agent_id, envelope).await,
        MessageType::Complete => handle_complete(state, agent_id, envelope).await,
        MessageType::Failed => handle_failed(state, agent_id, envelope).await,
        MessageType::Status => handle_status(agent_id, envelope),
        MessageType::Command | MessageType::Shutdown | MessageType::Unknown => {
            tracing::warn!(agent_id = %agent_id, kind = ?envelope.kind, "Unexpected message type from agent");
        }
    }
}

async fn handle_heartbeat(state: &AppState, agent_id: &str, envelope: Envelope) {
    let heartbeat: HeartbeatPayload = match envelope.decode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(agent_id = %agent_id, "Invalid heartbeat payload: {e}");
            return;
        }
    };

    // Liveness bookkeeping goes through the hub; an agent that is not in the
    // registry (e.g. mid-eviction) gets a logged no-op, not an error.
    if state.hub.touch(agent_id).await {
        state.writeback.heartbeat(agent_id);
    } else {
        tracing::debug!(agent_id = %agent_id, "Heartbeat from unregistered connection, skipping liveness update");
    }

    // Capacity is persisted regardless of registry membership.
    if let Some(capacity) = heartbeat.capacity {
        state.writeback.capacity(agent_id, capacity);
    }

    tracing::debug!(
        agent_id = %agent_id,
        status = %heartbeat.status,
        active_sessions = heartbeat.active_sessions,
        "Heartbeat"
    );
}

async fn handle_ack(state: &AppState, agent_id: &str, envelope: Envelope) {
    let ack: AckPayload = match envelope.decode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(agent_id = %agent_id, "Invalid ack payload: {e}");
            return;
        }
    };

    match state.store.mark_acked(&ack.command_id, agent_id).await {
        Ok(0) => tracing::warn!(
            agent_id = %agent_id,
            command_id = %ack.command_id,
            "Ack matched no command (wrong owner or state already advanced)"
        ),
        Ok(_) => tracing::info!(agent_id = %agent_id, command_id = %ack.command_id, "Command acknowledged"),
        Err(e) => tracing::warn!(command_id = %ack.command_id, "Failed to record ack: {e}"),
    }
}

async fn handle_complete(state: &AppState, agent_id: &str, envelope: Envelope) {
    let complete: CompletePayload = match envelope.decode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(agent_id = %agent_id, "Invalid complete payload: {e}");
            return;
        }
    };

    match state.store.mark_completed(&complete.command_id, agent_id).await {
        Ok(0) => tracing::warn!(
            agent_id = %agent_id,
            command_id = %complete.command_id,
            "Completion matched no command (wrong owner or state already advanced)"
        ),
        Ok(_) => tracing::info!(agent_id = %agent_id, command_id = %complete.command_id, "Command completed"),
        Err(e) => tracing::warn!(command_id = %complete.command_id, "Failed to record completion: {e}"),
    }
}

async fn handle_failed(state: &AppState, agent_id: &str, envelope: Envelope) {
    let failed: FailedPayload = match envelope.decode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(agent_id = %agent_id, "Invalid failed payload: {e}");
            return;
        }
    };

    match state
        .store
        .mark_failed(&failed.command_id, agent_id, &failed.error)
        .await
    {
        Ok(0) => tracing::warn!(
            agent_id = %agent_id,
            command_id = %failed.command_id,
            "Failure report matched no command (wrong owner or state already advanced)"
        ),
        Ok(_) => tracing::warn!(
            agent_id = %agent_id,
            command_id = %failed.command_id,
            error = %failed.error,
            "Command failed"
        ),
        Err(e) => tracing::warn!(command_id = %failed.command_id, "Failed to record failure: {e}"),
    }
}

/// Session state write-through is a planned extension point; for now status
/// reports are only logged.
fn handle_status(agent_id: &str, envelope: Envelope) {
    let status: StatusPayload = match envelope.decode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(agent_id = %agent_id, "Invalid status payload: {e}");
            return;
        }
    };

    tracing::info!(
        agent_id = %agent_id,
        session_id = %status.session_id,
        state = %status.state,
        vnc_ready = status.vnc_ready,
        vnc_port = ?status.vnc_port,
        "Session status update"
    );
}
