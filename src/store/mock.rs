//! In-memory `ControlStore` for tests. Mirrors the Postgres guards: command
//! updates are scoped by `(command_id, agent_id)` and gated by the
//! `CommandStatus` transition table.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    Agent, AgentCapacity, AgentCommand, AgentStatus, CommandStatus,
};
use crate::store::{AgentFilter, AgentRegistration, ControlStore, NewCommand};

#[derive(Default)]
pub struct MockStore {
    pub agents: Mutex<HashMap<String, Agent>>,
    pub commands: Mutex<HashMap<String, AgentCommand>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an agent directly, bypassing the registration path.
    pub fn with_agent(self, agent_id: &str, platform: crate::model::Platform) -> Self {
        let now = Utc::now();
        self.agents.lock().unwrap().insert(
            agent_id.to_string(),
            Agent {
                id: Uuid::new_v4(),
                agent_id: agent_id.to_string(),
                platform,
                region: None,
                status: AgentStatus::Offline,
                capacity: None,
                last_heartbeat: None,
                websocket_id: None,
                metadata: None,
                created_at: now,
                updated_at: now,
            },
        );
        self
    }

    pub fn agent_status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.agents.lock().unwrap().get(agent_id).map(|a| a.status)
    }

    pub fn command_status(&self, command_id: &str) -> Option<CommandStatus> {
        self.commands.lock().unwrap().get(command_id).map(|c| c.status)
    }
}

#[async_trait]
impl ControlStore for MockStore {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, DatabaseError> {
        Ok(self.agents.lock().unwrap().get(agent_id).cloned())
    }

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>, DatabaseError> {
        let mut agents: Vec<Agent> = self
            .agents
            .lock()
            .unwrap()
            .values()
            .filter(|a| filter.platform.map_or(true, |p| a.platform == p))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| {
                filter
                    .region
                    .as_ref()
                    .map_or(true, |r| a.region.as_deref() == Some(r.as_str()))
            })
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(agents)
    }

    async fn upsert_agent(&self, reg: &AgentRegistration) -> Result<(Agent, bool), DatabaseError> {
        let mut agents = self.agents.lock().unwrap();
        let now = Utc::now();
        match agents.get_mut(&reg.agent_id) {
            Some(agent) => {
                agent.platform = reg.platform;
                agent.region = reg.region.clone();
                agent.status = AgentStatus::Online;
                agent.capacity = reg.capacity.clone();
                agent.metadata = reg.metadata.clone();
                agent.last_heartbeat = Some(now);
                agent.updated_at = now;
                Ok((agent.clone(), false))
            }
            None => {
                let agent = Agent {
                    id: Uuid::new_v4(),
                    agent_id: reg.agent_id.clone(),
                    platform: reg.platform,
                    region: reg.region.clone(),
                    status: AgentStatus::Online,
                    capacity: reg.capacity.clone(),
                    last_heartbeat: Some(now),
                    websocket_id: None,
                    metadata: reg.metadata.clone(),
                    created_at: now,
                    updated_at: now,
                };
                agents.insert(reg.agent_id.clone(), agent.clone());
                Ok((agent, true))
            }
        }
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.agents.lock().unwrap().remove(agent_id).is_some())
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), DatabaseError> {
        let mut agents = self.agents.lock().unwrap();
        if let Some(agent) = agents.get_mut(agent_id) {
            agent.status = status;
            agent.updated_at = Utc::now();
            if status == AgentStatus::Online {
                agent.last_heartbeat = Some(agent.updated_at);
            }
        }
        Ok(())
    }

    async fn touch_heartbeat(
        &self,
        agent_id: &str,
        status: Option<AgentStatus>,
        capacity: Option<&AgentCapacity>,
    ) -> Result<bool, DatabaseError> {
        let mut agents = self.agents.lock().unwrap();
        match agents.get_mut(agent_id) {
            Some(agent) => {
                let now = Utc::now();
                agent.last_heartbeat = Some(now);
                agent.updated_at = now;
                if let Some(status) = status {
                    agent.status = status;
                }
                if let Some(capacity) = capacity {
                    agent.capacity = Some(capacity.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_capacity(&self, agent_id: &str, capacity: &AgentCapacity) -> Result<(), DatabaseError> {
        let mut agents = self.agents.lock().unwrap();
        if let Some(agent) = agents.get_mut(agent_id) {
            agent.capacity = Some(capacity.clone());
            agent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn create_command(&self, command: &NewCommand) -> Result<AgentCommand, DatabaseError> {
        let record = AgentCommand {
            id: Uuid::new_v4(),
            command_id: command.command_id.clone(),
            agent_id: command.agent_id.clone(),
            session_id: command.session_id.clone(),
            action: command.action,
            payload: command.payload.clone(),
            status: CommandStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            sent_at: None,
            acknowledged_at: None,
            completed_at: None,
        };
        self.commands
            .lock()
            .unwrap()
            .insert(command.command_id.clone(), record.clone());
        Ok(record)
    }

    async fn get_command(&self, command_id: &str) -> Result<Option<AgentCommand>, DatabaseError> {
        Ok(self.commands.lock().unwrap().get(command_id).cloned())
    }

    async fn list_commands(&self, agent_id: &str, limit: i64) -> Result<Vec<AgentCommand>, DatabaseError> {
        let mut commands: Vec<AgentCommand> = self
            .commands
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.agent_id == agent_id)
            .cloned()
            .collect();
        commands.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        commands.truncate(limit as usize);
        Ok(commands)
    }

    async fn mark_sent(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError> {
        let mut commands = self.commands.lock().unwrap();
        match commands.get_mut(command_id) {
            Some(c) if c.agent_id == agent_id && c.status.can_transition(CommandStatus::Sent) => {
                c.status = CommandStatus::Sent;
                c.sent_at = Some(Utc::now());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn mark_acked(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError> {
        let mut commands = self.commands.lock().unwrap();
        match commands.get_mut(command_id) {
            Some(c) if c.agent_id == agent_id && c.status.can_transition(CommandStatus::Ack) => {
                c.status = CommandStatus::Ack;
                c.acknowledged_at = Some(Utc::now());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn mark_completed(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError> {
        let mut commands = self.commands.lock().unwrap();
        match commands.get_mut(command_id) {
            Some(c)
                if c.agent_id == agent_id && c.status.can_transition(CommandStatus::Completed) =>
            {
                c.status = CommandStatus::Completed;
                c.completed_at = Some(Utc::now());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn mark_failed(
        &self,
        command_id: &str,
        agent_id: &str,
        error: &str,
    ) -> Result<u64, DatabaseError> {
        let mut commands = self.commands.lock().unwrap();
        match commands.get_mut(command_id) {
            Some(c) if c.agent_id == agent_id && c.status.can_transition(CommandStatus::Failed) => {
                c.status = CommandStatus::Failed;
                c.error_message = Some(error.to_string());
                c.completed_at = Some(Utc::now());
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandAction, Platform};

    async fn command_at(store: &MockStore, command_id: &str, status: CommandStatus) {
        store
            .create_command(&NewCommand {
                command_id: command_id.to_string(),
                agent_id: "agent-1".to_string(),
                session_id: None,
                action: CommandAction::StartSession,
                payload: None,
            })
            .await
            .unwrap();
        store.commands.lock().unwrap().get_mut(command_id).unwrap().status = status;
    }

    #[tokio::test]
    async fn ack_is_accepted_on_a_pending_command() {
        // The agent's report can overtake the dispatcher's sent write.
        let store = MockStore::new().with_agent("agent-1", Platform::Docker);
        command_at(&store, "cmd-1", CommandStatus::Pending).await;

        assert_eq!(store.mark_acked("cmd-1", "agent-1").await.unwrap(), 1);
        assert_eq!(store.command_status("cmd-1"), Some(CommandStatus::Ack));

        // The late sent write and a duplicate ack are zero-row no-ops.
        assert_eq!(store.mark_sent("cmd-1", "agent-1").await.unwrap(), 0);
        assert_eq!(store.mark_acked("cmd-1", "agent-1").await.unwrap(), 0);
        assert_eq!(store.command_status("cmd-1"), Some(CommandStatus::Ack));
    }

    #[tokio::test]
    async fn guards_agree_with_the_transition_table() {
        use CommandStatus::*;

        for from in CommandStatus::ALL {
            let store = MockStore::new().with_agent("agent-1", Platform::Docker);
            command_at(&store, "cmd-1", from).await;
            let rows = store.mark_sent("cmd-1", "agent-1").await.unwrap();
            assert_eq!(rows == 1, from.can_transition(Sent), "sent from {from}");
        }
        for from in CommandStatus::ALL {
            let store = MockStore::new().with_agent("agent-1", Platform::Docker);
            command_at(&store, "cmd-1", from).await;
            let rows = store.mark_acked("cmd-1", "agent-1").await.unwrap();
            assert_eq!(rows == 1, from.can_transition(Ack), "ack from {from}");
        }
        for from in CommandStatus::ALL {
            let store = MockStore::new().with_agent("agent-1", Platform::Docker);
            command_at(&store, "cmd-1", from).await;
            let rows = store.mark_completed("cmd-1", "agent-1").await.unwrap();
            assert_eq!(rows == 1, from.can_transition(Completed), "completed from {from}");
        }
        for from in CommandStatus::ALL {
            let store = MockStore::new().with_agent("agent-1", Platform::Docker);
            command_at(&store, "cmd-1", from).await;
            let rows = store.mark_failed("cmd-1", "agent-1", "boom").await.unwrap();
            assert_eq!(rows == 1, from.can_transition(Failed), "failed from {from}");
        }
    }
}
