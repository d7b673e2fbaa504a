//! Per-socket connection state owned by the hub's registry task.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::hub::OUTBOUND_QUEUE;
use crate::model::Platform;

/// One live agent WebSocket, as the hub sees it.
///
/// The registry task owns the struct exclusively; the socket's write pump
/// holds the receiving end of `outbound`. Dropping the struct drops the
/// sender, which ends the write pump and closes the socket.
pub struct AgentConnection {
    pub agent_id: String,
    pub platform: Platform,
    /// Generation id distinguishing this connection from a replacement for
    /// the same agent_id, so a superseded connection's unregister is ignored.
    pub conn_id: Uuid,
    /// Timestamp of the last heartbeat seen on this connection.
    pub last_ping: DateTime<Utc>,
    outbound: mpsc::Sender<String>,
}

impl AgentConnection {
    /// Create the connection handle and the outbound queue receiver for its
    /// write pump.
    pub fn new(agent_id: impl Into<String>, platform: Platform) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (
            Self {
                agent_id: agent_id.into(),
                platform,
                conn_id: Uuid::new_v4(),
                last_ping: Utc::now(),
                outbound: tx,
            },
            rx,
        )
    }

    /// Enqueue a frame without blocking. A full or closed queue is a
    /// dispatch failure; the command stays in its prior state for retry.
    pub fn enqueue(&self, frame: String) -> Result<(), DispatchError> {
        self.outbound.try_send(frame).map_err(|_| DispatchError::QueueUnavailable {
            agent_id: self.agent_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_delivers_to_write_pump_receiver() {
        let (conn, mut rx) = AgentConnection::new("agent-1", Platform::Docker);
        conn.enqueue("{\"type\":\"command\"}".to_string()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "{\"type\":\"command\"}");
    }

    #[tokio::test]
    async fn enqueue_fails_once_receiver_is_gone() {
        let (conn, rx) = AgentConnection::new("agent-1", Platform::Docker);
        drop(rx);
        let err = conn.enqueue("frame".to_string()).unwrap_err();
        assert!(matches!(err, DispatchError::QueueUnavailable { .. }));
    }
}
