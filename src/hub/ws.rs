//! WebSocket upgrade and per-connection pumps for the agent control channel.
//!
//! `GET /agents/connect?agent_id=<id>`: the agent must already exist in the
//! durable store (registered over HTTP) before the upgrade is accepted. After
//! the upgrade the connection is registered with the hub and two tasks run
//! for its lifetime: a read pump decoding protocol envelopes under a rolling
//! read deadline, and a write pump draining the outbound queue and sending
//! keepalive pings. Either pump ending tears the whole connection down.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::api::AppState;
use crate::hub::connection::AgentConnection;
use crate::hub::{session, MAX_MESSAGE_SIZE, PING_PERIOD, PONG_WAIT, WRITE_WAIT};
use crate::model::{Agent, Platform};
use crate::protocol::Envelope;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub agent_id: Option<String>,
}

/// Handler for the agent WebSocket upgrade. All validation happens before
/// the 101 response; an unknown or missing agent never gets a socket.
pub async fn agent_connect(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let agent = match validate_connect(&state, query).await {
        Ok(agent) => agent,
        Err(rejection) => return rejection,
    };

    tracing::info!(agent_id = %agent.agent_id, platform = %agent.platform, "Agent connecting");

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_agent(socket, state, agent.agent_id, agent.platform))
}

/// Gate the upgrade: the agent_id must be present and refer to a registered
/// agent. `Err` carries the ready-made HTTP rejection.
async fn validate_connect(state: &AppState, query: ConnectQuery) -> Result<Agent, Response> {
    let agent_id = match query.agent_id.filter(|id| !id.is_empty()) {
        Some(agent_id) => agent_id,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Missing agent_id",
                    "details": "agent_id query parameter is required",
                })),
            )
                .into_response());
        }
    };

    match state.store.get_agent(&agent_id).await {
        Ok(Some(agent)) => Ok(agent),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Agent not found",
                "details": "Agent must register before connecting via WebSocket",
                "agentId": agent_id,
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!(agent_id = %agent_id, "Database error checking agent: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Database error",
                    "details": e.to_string(),
                })),
            )
                .into_response())
        }
    }
}

/// Own one upgraded socket until either pump ends, then unregister.
async fn serve_agent(socket: WebSocket, state: AppState, agent_id: String, platform: Platform) {
    let (conn, outbound_rx) = AgentConnection::new(agent_id.clone(), platform);
    let conn_id = conn.conn_id;

    if state.hub.register(conn).await.is_err() {
        tracing::warn!(agent_id = %agent_id, "Hub unavailable, dropping connection");
        return;
    }

    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_pump(ws_tx, outbound_rx, agent_id.clone()));

    tokio::select! {
        _ = read_pump(ws_rx, &state, &agent_id) => {}
        _ = &mut writer => {}
    }

    state.hub.unregister(&agent_id, conn_id).await;
    writer.abort();
    tracing::info!(agent_id = %agent_id, "Agent disconnected");
}

/// Read frames under a rolling deadline and route protocol envelopes.
///
/// Only a pong advances the deadline: an agent that stops answering
/// keepalive pings is torn down after `PONG_WAIT` even if it keeps sending
/// data frames. Oversized frames surface as read errors via the upgrade's
/// message-size cap. Malformed JSON is logged and dropped without closing
/// the connection.
async fn read_pump(mut ws_rx: SplitStream<WebSocket>, state: &AppState, agent_id: &str) {
    let mut deadline = Instant::now() + PONG_WAIT;
    loop {
        let next = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(agent_id = %agent_id, "Read deadline exceeded, closing connection");
                return;
            }
            next = ws_rx.next() => next,
        };

        let message = match next {
            None => return,
            Some(Err(e)) => {
                tracing::info!(agent_id = %agent_id, "Read error: {e}");
                return;
            }
            Some(Ok(message)) => message,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return,
            Message::Pong(_) => {
                deadline = Instant::now() + PONG_WAIT;
                continue;
            }
            // Pings are answered by the websocket layer; binary frames have
            // no meaning on this channel.
            Message::Ping(_) | Message::Binary(_) => continue,
        };

        match serde_json::from_str::<Envelope>(text.as_str()) {
            Ok(envelope) => session::route(state, agent_id, envelope).await,
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, "Invalid message from agent: {e}");
            }
        }
    }
}

/// Drain the outbound queue and keep the peer alive with periodic pings.
///
/// Every write gets a `WRITE_WAIT` budget; a slow or broken peer ends the
/// pump, which tears the connection down. When the hub drops the outbound
/// sender (eviction, shutdown) the queue closes and the pump sends a close
/// frame before exiting.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
    agent_id: String,
) {
    let start = tokio::time::Instant::now() + PING_PERIOD;
    let mut ping = tokio::time::interval_at(start, PING_PERIOD);

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let write = timeout(WRITE_WAIT, ws_tx.send(Message::Text(frame.into()))).await;
                        match write {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                tracing::info!(agent_id = %agent_id, "Write error: {e}");
                                return;
                            }
                            Err(_) => {
                                tracing::warn!(agent_id = %agent_id, "Write deadline exceeded");
                                return;
                            }
                        }
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            _ = ping.tick() => {
                let write = timeout(WRITE_WAIT, ws_tx.send(Message::Ping(Vec::new().into()))).await;
                if !matches!(write, Ok(Ok(()))) {
                    tracing::info!(agent_id = %agent_id, "Ping failed, closing connection");
                    return;
                }
            }
        }
    }
}
