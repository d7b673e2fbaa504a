//! The connection registry: a single task owning the agent_id → connection
//! map. Every mutation and lookup travels over the hub's command channel, so
//! the map needs no lock and registry decisions are serialized.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::hub::connection::AgentConnection;
use crate::hub::writeback::Writeback;
use crate::model::AgentStatus;

const COMMAND_QUEUE: usize = 64;

enum HubCommand {
    Register(AgentConnection),
    Unregister {
        agent_id: String,
        conn_id: Uuid,
    },
    /// Liveness touch from a heartbeat; replies whether the agent was
    /// registered (false means the caller logs a no-op).
    Touch {
        agent_id: String,
        reply: oneshot::Sender<bool>,
    },
    IsConnected {
        agent_id: String,
        reply: oneshot::Sender<bool>,
    },
    Send {
        agent_id: String,
        frame: String,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    /// Administrative eviction (agent deregistered over HTTP).
    Evict {
        agent_id: String,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Stop,
}

/// Cloneable handle to the registry task.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Create the handle and its runner. The runner must be spawned
    /// (`tokio::spawn(runner.run())`) before the handle is used.
    pub fn new(writeback: Writeback) -> (Self, HubRunner) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        (
            Self { tx },
            HubRunner {
                rx,
                connections: HashMap::new(),
                writeback,
            },
        )
    }

    /// Register a connection, evicting any previous one for the same agent.
    pub async fn register(&self, conn: AgentConnection) -> Result<(), DispatchError> {
        let agent_id = conn.agent_id.clone();
        self.tx
            .send(HubCommand::Register(conn))
            .await
            .map_err(|_| DispatchError::NotConnected { agent_id })
    }

    /// Remove a connection if it is still the current one for the agent.
    pub async fn unregister(&self, agent_id: &str, conn_id: Uuid) {
        let _ = self
            .tx
            .send(HubCommand::Unregister {
                agent_id: agent_id.to_string(),
                conn_id,
            })
            .await;
    }

    /// Point-in-time connectivity check; gates command dispatch.
    pub async fn is_connected(&self, agent_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .tx
            .send(HubCommand::IsConnected {
                agent_id: agent_id.to_string(),
                reply,
            })
            .await;
        sent.is_ok() && rx.await.unwrap_or(false)
    }

    /// Update the connection's liveness stamp; false if not registered.
    pub async fn touch(&self, agent_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .tx
            .send(HubCommand::Touch {
                agent_id: agent_id.to_string(),
                reply,
            })
            .await;
        sent.is_ok() && rx.await.unwrap_or(false)
    }

    /// Enqueue a wire frame on the agent's outbound queue.
    pub async fn send_frame(&self, agent_id: &str, frame: String) -> Result<(), DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Send {
                agent_id: agent_id.to_string(),
                frame,
                reply,
            })
            .await
            .map_err(|_| DispatchError::NotConnected {
                agent_id: agent_id.to_string(),
            })?;
        rx.await.unwrap_or(Err(DispatchError::NotConnected {
            agent_id: agent_id.to_string(),
        }))
    }

    /// Drop any live connection for the agent without a status writeback.
    pub async fn evict(&self, agent_id: &str) {
        let _ = self
            .tx
            .send(HubCommand::Evict {
                agent_id: agent_id.to_string(),
            })
            .await;
    }

    pub async fn connected_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Count { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stop the registry task, closing all outbound queues.
    pub async fn stop(&self) {
        let _ = self.tx.send(HubCommand::Stop).await;
    }
}

/// The registry task state; owns the connection map exclusively.
pub struct HubRunner {
    rx: mpsc::Receiver<HubCommand>,
    connections: HashMap<String, AgentConnection>,
    writeback: Writeback,
}

impl HubRunner {
    /// Event loop. Runs until `Stop` or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Hub registry loop started");
        while let Some(command) = self.rx.recv().await {
            match command {
                HubCommand::Register(conn) => self.handle_register(conn),
                HubCommand::Unregister { agent_id, conn_id } => {
                    self.handle_unregister(&agent_id, conn_id)
                }
                HubCommand::Touch { agent_id, reply } => {
                    let registered = match self.connections.get_mut(&agent_id) {
                        Some(conn) => {
                            conn.last_ping = Utc::now();
                            true
                        }
                        None => false,
                    };
                    let _ = reply.send(registered);
                }
                HubCommand::IsConnected { agent_id, reply } => {
                    let _ = reply.send(self.connections.contains_key(&agent_id));
                }
                HubCommand::Send { agent_id, frame, reply } => {
                    let result = match self.connections.get(&agent_id) {
                        Some(conn) => conn.enqueue(frame),
                        None => Err(DispatchError::NotConnected { agent_id }),
                    };
                    let _ = reply.send(result);
                }
                HubCommand::Evict { agent_id } => {
                    if self.connections.remove(&agent_id).is_some() {
                        tracing::info!(agent_id = %agent_id, "Evicted live connection");
                    }
                }
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.connections.len());
                }
                HubCommand::Stop => break,
            }
        }
        // Dropping the map drops every outbound sender, which ends the write
        // pumps and closes the sockets.
        let remaining = self.connections.len();
        self.connections.clear();
        tracing::info!(connections = remaining, "Hub registry loop stopped");
    }

    fn handle_register(&mut self, conn: AgentConnection) {
        let agent_id = conn.agent_id.clone();
        if let Some(old) = self.connections.insert(agent_id.clone(), conn) {
            tracing::info!(
                agent_id = %agent_id,
                old_conn = %old.conn_id,
                "Agent already connected, replacing old connection"
            );
        }
        tracing::info!(
            agent_id = %agent_id,
            total = self.connections.len(),
            "Registered agent connection"
        );
        self.writeback.agent_status(&agent_id, AgentStatus::Online);
    }

    fn handle_unregister(&mut self, agent_id: &str, conn_id: Uuid) {
        match self.connections.get(agent_id) {
            Some(current) if current.conn_id == conn_id => {
                self.connections.remove(agent_id);
                tracing::info!(
                    agent_id = %agent_id,
                    remaining = self.connections.len(),
                    "Unregistered agent connection"
                );
                self.writeback.agent_status(agent_id, AgentStatus::Offline);
            }
            Some(_) => {
                // A newer connection superseded this one; the agent is still
                // online through it.
                tracing::debug!(agent_id = %agent_id, "Ignoring stale unregister");
            }
            None => {
                tracing::debug!(agent_id = %agent_id, "Unregister for unknown connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::Platform;
    use crate::store::mock::MockStore;
    use crate::store::ControlStore;

    fn hub_with_store() -> (Hub, Arc<MockStore>) {
        let store = Arc::new(
            MockStore::new()
                .with_agent("agent-k8s-1", Platform::Kubernetes)
                .with_agent("agent-docker-1", Platform::Docker),
        );
        let writeback = Writeback::spawn(Arc::clone(&store) as Arc<dyn ControlStore>);
        let (hub, runner) = Hub::new(writeback);
        tokio::spawn(runner.run());
        (hub, store)
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn register_marks_agent_online_and_connected() {
        let (hub, store) = hub_with_store();
        let (conn, _rx) = AgentConnection::new("agent-k8s-1", Platform::Kubernetes);
        hub.register(conn).await.unwrap();
        settle().await;

        assert!(hub.is_connected("agent-k8s-1").await);
        assert_eq!(hub.connected_count().await, 1);
        assert_eq!(store.agent_status("agent-k8s-1"), Some(crate::model::AgentStatus::Online));
    }

    #[tokio::test]
    async fn unregister_marks_agent_offline() {
        let (hub, store) = hub_with_store();
        let (conn, _rx) = AgentConnection::new("agent-k8s-1", Platform::Kubernetes);
        let conn_id = conn.conn_id;
        hub.register(conn).await.unwrap();
        hub.unregister("agent-k8s-1", conn_id).await;
        settle().await;

        assert!(!hub.is_connected("agent-k8s-1").await);
        assert_eq!(store.agent_status("agent-k8s-1"), Some(crate::model::AgentStatus::Offline));
    }

    #[tokio::test]
    async fn stale_unregister_from_replaced_connection_is_ignored() {
        let (hub, store) = hub_with_store();

        let (old, mut old_rx) = AgentConnection::new("agent-k8s-1", Platform::Kubernetes);
        let old_id = old.conn_id;
        hub.register(old).await.unwrap();

        let (new, _new_rx) = AgentConnection::new("agent-k8s-1", Platform::Kubernetes);
        hub.register(new).await.unwrap();
        settle().await;

        // The replaced connection's outbound queue is closed by the eviction.
        assert!(old_rx.recv().await.is_none());

        // Its teardown path reports a stale unregister; the agent stays online.
        hub.unregister("agent-k8s-1", old_id).await;
        settle().await;
        assert!(hub.is_connected("agent-k8s-1").await);
        assert_eq!(hub.connected_count().await, 1);
        assert_eq!(store.agent_status("agent-k8s-1"), Some(crate::model::AgentStatus::Online));
    }

    #[tokio::test]
    async fn send_frame_reaches_the_connection_queue() {
        let (hub, _store) = hub_with_store();
        let (conn, mut rx) = AgentConnection::new("agent-docker-1", Platform::Docker);
        hub.register(conn).await.unwrap();

        hub.send_frame("agent-docker-1", "frame-1".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "frame-1");
    }

    #[tokio::test]
    async fn send_frame_to_unknown_agent_is_not_connected() {
        let (hub, _store) = hub_with_store();
        let err = hub.send_frame("ghost", "frame".to_string()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn touch_reports_registry_membership() {
        let (hub, _store) = hub_with_store();
        assert!(!hub.touch("agent-k8s-1").await);

        let (conn, _rx) = AgentConnection::new("agent-k8s-1", Platform::Kubernetes);
        hub.register(conn).await.unwrap();
        assert!(hub.touch("agent-k8s-1").await);
    }

    #[tokio::test]
    async fn stop_closes_outbound_queues() {
        let (hub, _store) = hub_with_store();
        let (conn, mut rx) = AgentConnection::new("agent-k8s-1", Platform::Kubernetes);
        hub.register(conn).await.unwrap();

        hub.stop().await;
        assert!(rx.recv().await.is_none());
    }
}
