//! Agent registration, CRUD, the REST heartbeat fallback, and command issuing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::DatabaseError;
use crate::model::{AgentCapacity, AgentStatus, CommandAction, Platform};
use crate::store::{AgentFilter, AgentRegistration, NewCommand};

fn db_error(e: DatabaseError) -> Response {
    tracing::error!("Database error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Database error", "details": e.to_string()})),
    )
        .into_response()
}

fn agent_not_found(agent_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Agent not found", "agentId": agent_id})),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub platform: Platform,
    pub region: Option<String>,
    pub capacity: Option<AgentCapacity>,
    pub metadata: Option<serde_json::Value>,
}

/// `POST /agents/register` — create or refresh an agent record.
///
/// New agents get 201, re-registrations 200; both come back online with a
/// fresh heartbeat stamp.
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> Response {
    if req.agent_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing agentId", "details": "agentId is required"})),
        )
            .into_response();
    }

    let registration = AgentRegistration {
        agent_id: req.agent_id,
        platform: req.platform,
        region: req.region,
        capacity: req.capacity,
        metadata: req.metadata,
    };

    match state.store.upsert_agent(&registration).await {
        Ok((agent, created)) => {
            tracing::info!(
                agent_id = %agent.agent_id,
                platform = %agent.platform,
                created,
                "Agent registered"
            );
            let status = if created { StatusCode::CREATED } else { StatusCode::OK };
            (status, Json(agent)).into_response()
        }
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    pub platform: Option<Platform>,
    pub status: Option<AgentStatus>,
    pub region: Option<String>,
}

/// `GET /agents` — list agents with optional platform/status/region filters.
pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> Response {
    let filter = AgentFilter {
        platform: query.platform,
        status: query.status,
        region: query.region,
    };
    match state.store.list_agents(&filter).await {
        Ok(agents) => {
            let count = agents.len();
            Json(json!({"agents": agents, "count": count})).into_response()
        }
        Err(e) => db_error(e),
    }
}

/// `GET /agents/{agent_id}`.
pub async fn get_agent(State(state): State<AppState>, Path(agent_id): Path<String>) -> Response {
    match state.store.get_agent(&agent_id).await {
        Ok(Some(agent)) => Json(agent).into_response(),
        Ok(None) => agent_not_found(&agent_id),
        Err(e) => db_error(e),
    }
}

/// `DELETE /agents/{agent_id}` — administrative deregistration. Any live
/// connection is evicted along with the durable record.
pub async fn deregister_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Response {
    match state.store.delete_agent(&agent_id).await {
        Ok(true) => {
            state.hub.evict(&agent_id).await;
            tracing::info!(agent_id = %agent_id, "Agent deregistered");
            Json(json!({"message": "Agent deregistered", "agentId": agent_id})).into_response()
        }
        Ok(false) => agent_not_found(&agent_id),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub status: AgentStatus,
    pub capacity: Option<AgentCapacity>,
    #[serde(rename = "activeSessions")]
    pub active_sessions: Option<i64>,
}

/// `POST /agents/{agent_id}/heartbeat` — REST fallback for agents not using
/// the WebSocket heartbeat.
pub async fn update_heartbeat(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    match state
        .store
        .touch_heartbeat(&agent_id, Some(req.status), req.capacity.as_ref())
        .await
    {
        Ok(true) => Json(json!({
            "message": "Heartbeat updated successfully",
            "agentId": agent_id,
            "status": req.status,
            "lastHeartbeat": Utc::now(),
        }))
        .into_response(),
        Ok(false) => agent_not_found(&agent_id),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendCommandRequest {
    pub action: CommandAction,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub payload: Option<serde_json::Value>,
}

/// `POST /agents/{agent_id}/command` — create and dispatch a command.
///
/// Connectivity is checked before anything is persisted: an unreachable
/// agent yields 503 and leaves no command row behind. Only after the row is
/// created with status=pending does the dispatcher enqueue it (pending →
/// sent). A dispatch failure after the insert leaves the row pending, which
/// is safe to retry.
pub async fn send_command(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<SendCommandRequest>,
) -> Response {
    let agent = match state.store.get_agent(&agent_id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => return agent_not_found(&agent_id),
        Err(e) => return db_error(e),
    };

    if !state.hub.is_connected(&agent_id).await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Agent not connected",
                "details": "Agent must be connected via WebSocket to receive commands",
                "agentId": agent_id,
                "status": agent.status,
            })),
        )
            .into_response();
    }

    let new_command = NewCommand {
        command_id: format!("cmd-{}", Uuid::new_v4()),
        agent_id: agent_id.clone(),
        session_id: req.session_id,
        action: req.action,
        payload: req.payload,
    };

    let command = match state.store.create_command(&new_command).await {
        Ok(command) => command,
        Err(e) => return db_error(e),
    };

    if let Err(e) = state.dispatcher.dispatch(&command).await {
        tracing::warn!(command_id = %command.command_id, "Dispatch failed: {e}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Failed to dispatch command",
                "details": e.to_string(),
                "commandId": command.command_id,
            })),
        )
            .into_response();
    }

    // Reflect the sent transition in the response.
    let command = match state.store.get_command(&command.command_id).await {
        Ok(Some(row)) => row,
        _ => command,
    };
    (StatusCode::CREATED, Json(command)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ListCommandsQuery {
    pub limit: Option<i64>,
}

/// `GET /agents/{agent_id}/commands` — recent commands, newest first.
pub async fn list_commands(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<ListCommandsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state.store.list_commands(&agent_id, limit).await {
        Ok(commands) => {
            let count = commands.len();
            Json(json!({"commands": commands, "count": count})).into_response()
        }
        Err(e) => db_error(e),
    }
}
