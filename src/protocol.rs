//! Wire protocol for the agent control channel.
//!
//! Every frame in either direction is a JSON envelope:
//!
//! ```json
//! {"type": "heartbeat", "timestamp": "2026-08-30T10:30:00Z", "payload": {...}}
//! ```
//!
//! The `type` field selects how `payload` is decoded. Agent → server types
//! are heartbeat/ack/complete/failed/status; the server sends `command`
//! envelopes (keepalive pings are WebSocket control frames, not envelopes).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::{AgentCapacity, AgentCommand, CommandAction};

/// Discriminant for the envelope payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    // Server → agent.
    Command,
    Shutdown,
    // Agent → server.
    Heartbeat,
    Ack,
    Complete,
    Failed,
    Status,
    /// Anything this hub does not understand; logged and dropped.
    #[serde(other)]
    Unknown,
}

/// Top-level message envelope for the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: MessageType, payload: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Wrap a persisted command in a `command` envelope ready for the wire.
    pub fn command(command: &AgentCommand) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(CommandPayload::from(command))?;
        Ok(Self::new(MessageType::Command, payload))
    }

    /// Decode the payload as a concrete message type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// `command` payload: server instructs an agent to run a session operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(rename = "commandId")]
    pub command_id: String,
    pub action: CommandAction,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl From<&AgentCommand> for CommandPayload {
    fn from(command: &AgentCommand) -> Self {
        Self {
            command_id: command.command_id.clone(),
            action: command.action,
            session_id: command.session_id.clone(),
            payload: command.payload.clone().unwrap_or(serde_json::Value::Null),
        }
    }
}

/// `heartbeat` payload: periodic liveness and capacity report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub status: String,
    #[serde(rename = "activeSessions", default)]
    pub active_sessions: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<AgentCapacity>,
}

/// `ack` payload: agent received a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(rename = "commandId")]
    pub command_id: String,
}

/// `complete` payload: agent finished a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePayload {
    #[serde(rename = "commandId")]
    pub command_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// `failed` payload: agent could not execute a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPayload {
    #[serde(rename = "commandId")]
    pub command_id: String,
    pub error: String,
}

/// `status` payload: session state change report. Logging-only for now;
/// write-through to session state is a planned extension point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub state: String,
    #[serde(rename = "vncReady", default)]
    pub vnc_ready: bool,
    #[serde(rename = "vncPort", skip_serializing_if = "Option::is_none")]
    pub vnc_port: Option<u16>,
}
