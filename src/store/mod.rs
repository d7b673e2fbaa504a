//! Durable state: the `agents` and `agent_commands` tables.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{Agent, AgentCapacity, AgentCommand, AgentStatus, CommandAction, Platform};

pub mod postgres;

#[cfg(test)]
pub mod mock;

pub use postgres::PgStore;

/// Registration request for a new or returning agent.
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub platform: Platform,
    pub region: Option<String>,
    pub capacity: Option<AgentCapacity>,
    pub metadata: Option<serde_json::Value>,
}

/// Optional filters for listing agents.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub platform: Option<Platform>,
    pub status: Option<AgentStatus>,
    pub region: Option<String>,
}

/// A command about to be persisted with status `pending`.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub command_id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub action: CommandAction,
    pub payload: Option<serde_json::Value>,
}

/// Store abstraction over the control plane's durable state.
///
/// All command-lifecycle updates are scoped by `(command_id, agent_id)` so an
/// agent can only mutate its own commands, and gated by the `CommandStatus`
/// transition table; they return the number of rows affected so callers can
/// log zero-row updates (wrong owner, duplicate report, or late message
/// after completion).
#[async_trait]
pub trait ControlStore: Send + Sync {
    // --- Agents ---

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, DatabaseError>;

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>, DatabaseError>;

    /// Insert or refresh an agent record; returns the row and whether it was
    /// newly created. Registration always brings the agent online.
    async fn upsert_agent(&self, reg: &AgentRegistration) -> Result<(Agent, bool), DatabaseError>;

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, DatabaseError>;

    /// Flip the reachability status (online on register, offline on disconnect).
    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), DatabaseError>;

    /// Record a heartbeat: last_heartbeat=now, plus status/capacity when given.
    /// Returns false if no such agent exists.
    async fn touch_heartbeat(
        &self,
        agent_id: &str,
        status: Option<AgentStatus>,
        capacity: Option<&AgentCapacity>,
    ) -> Result<bool, DatabaseError>;

    /// Persist capacity reported over the control channel.
    async fn update_capacity(&self, agent_id: &str, capacity: &AgentCapacity) -> Result<(), DatabaseError>;

    // --- Commands ---

    async fn create_command(&self, command: &NewCommand) -> Result<AgentCommand, DatabaseError>;

    async fn get_command(&self, command_id: &str) -> Result<Option<AgentCommand>, DatabaseError>;

    async fn list_commands(&self, agent_id: &str, limit: i64) -> Result<Vec<AgentCommand>, DatabaseError>;

    /// pending → sent with sent_at=now.
    async fn mark_sent(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError>;

    /// pending|sent → ack with acknowledged_at=now.
    async fn mark_acked(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError>;

    /// pending|sent|ack → completed with completed_at=now.
    async fn mark_completed(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError>;

    /// pending|sent|ack → failed with error_message and completed_at=now.
    async fn mark_failed(
        &self,
        command_id: &str,
        agent_id: &str,
        error: &str,
    ) -> Result<u64, DatabaseError>;
}
