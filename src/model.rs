//! Durable domain types: agents and the commands dispatched to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution platform an agent manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Kubernetes,
    Docker,
    Vm,
    Cloud,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Kubernetes => "kubernetes",
            Platform::Docker => "docker",
            Platform::Vm => "vm",
            Platform::Cloud => "cloud",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "kubernetes" => Some(Platform::Kubernetes),
            "docker" => Some(Platform::Docker),
            "vm" => Some(Platform::Vm),
            "cloud" => Some(Platform::Cloud),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reachability status of an agent as recorded in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Draining,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Draining => "draining",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(AgentStatus::Online),
            "offline" => Some(AgentStatus::Offline),
            "draining" => Some(AgentStatus::Draining),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource capacity reported by an agent, stored as JSONB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapacity {
    #[serde(rename = "maxSessions")]
    pub max_sessions: i64,
    pub cpu: String,
    pub memory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

/// A platform-specific execution agent known to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub agent_id: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<AgentCapacity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Opaque correlation id for the agent's live WebSocket, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session-lifecycle operation an agent can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    StartSession,
    StopSession,
    HibernateSession,
    WakeSession,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::StartSession => "start_session",
            CommandAction::StopSession => "stop_session",
            CommandAction::HibernateSession => "hibernate_session",
            CommandAction::WakeSession => "wake_session",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start_session" => Some(CommandAction::StartSession),
            "stop_session" => Some(CommandAction::StopSession),
            "hibernate_session" => Some(CommandAction::HibernateSession),
            "wake_session" => Some(CommandAction::WakeSession),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a dispatched command.
///
/// `Completed` and `Failed` are terminal: no transition out of them is
/// accepted, and the store-level updates carry the same guard so a late
/// ack/complete over the wire is a zero-row no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Sent,
    Ack,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Sent => "sent",
            CommandStatus::Ack => "ack",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CommandStatus::Pending),
            "sent" => Some(CommandStatus::Sent),
            "ack" => Some(CommandStatus::Ack),
            "completed" => Some(CommandStatus::Completed),
            "failed" => Some(CommandStatus::Failed),
            _ => None,
        }
    }

    pub const ALL: [CommandStatus; 5] = [
        CommandStatus::Pending,
        CommandStatus::Sent,
        CommandStatus::Ack,
        CommandStatus::Completed,
        CommandStatus::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle transition.
    ///
    /// An agent's report may overtake the dispatcher's own pending → sent
    /// write (the frame is enqueued before the row is updated), so ack,
    /// completed and failed are reachable straight from pending. An agent
    /// may also complete without a preceding ack. Nothing moves a command
    /// out of a terminal state, and no state repeats.
    pub fn can_transition(&self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        match (self, next) {
            (Pending, Sent) | (Pending, Ack) | (Pending, Completed) | (Pending, Failed) => true,
            (Sent, Ack) | (Sent, Completed) | (Sent, Failed) => true,
            (Ack, Completed) | (Ack, Failed) => true,
            _ => false,
        }
    }

    /// States a command may be in for a transition to `next` to be accepted.
    /// Drives the store-level UPDATE guards, so the table and the SQL cannot
    /// drift apart.
    pub fn transition_sources(next: CommandStatus) -> impl Iterator<Item = CommandStatus> {
        Self::ALL.into_iter().filter(move |s| s.can_transition(next))
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command issued to an agent, tracked from pending to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCommand {
    pub id: Uuid,
    pub command_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub action: CommandAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
