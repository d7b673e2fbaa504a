//! Bounded background queue for best-effort durable writes.
//!
//! Status flips and heartbeat touches triggered by connection events must not
//! block the registry task or a read pump on the database, and their failures
//! are logged rather than surfaced to the agent. Instead of untracked spawned
//! writes, everything goes through one bounded queue drained by a single
//! worker, with counters for dropped jobs and failed writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::model::{AgentCapacity, AgentStatus};
use crate::store::ControlStore;

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug)]
enum WriteJob {
    /// online/offline flip from register/unregister.
    AgentStatus { agent_id: String, status: AgentStatus },
    /// last_heartbeat touch for a registered connection.
    Heartbeat { agent_id: String },
    /// Capacity reported in a heartbeat payload.
    Capacity { agent_id: String, capacity: AgentCapacity },
}

/// Counters published on /health.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WritebackStats {
    /// Jobs rejected because the queue was full.
    pub dropped_jobs: u64,
    /// Jobs whose database write failed.
    pub write_failures: u64,
}

/// Handle for enqueueing background writes. Cheap to clone.
#[derive(Clone)]
pub struct Writeback {
    tx: mpsc::Sender<WriteJob>,
    dropped: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl Writeback {
    /// Spawn the worker task draining the queue against `store`.
    pub fn spawn(store: Arc<dyn ControlStore>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let failures = Arc::new(AtomicU64::new(0));
        tokio::spawn(worker(store, rx, Arc::clone(&failures)));
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            failures,
        }
    }

    pub fn agent_status(&self, agent_id: &str, status: AgentStatus) {
        self.push(WriteJob::AgentStatus {
            agent_id: agent_id.to_string(),
            status,
        });
    }

    pub fn heartbeat(&self, agent_id: &str) {
        self.push(WriteJob::Heartbeat {
            agent_id: agent_id.to_string(),
        });
    }

    pub fn capacity(&self, agent_id: &str, capacity: AgentCapacity) {
        self.push(WriteJob::Capacity {
            agent_id: agent_id.to_string(),
            capacity,
        });
    }

    pub fn stats(&self) -> WritebackStats {
        WritebackStats {
            dropped_jobs: self.dropped.load(Ordering::Relaxed),
            write_failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn push(&self, job: WriteJob) {
        if let Err(e) = self.tx.try_send(job) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Writeback queue rejected job: {e}");
        }
    }
}

async fn worker(
    store: Arc<dyn ControlStore>,
    mut rx: mpsc::Receiver<WriteJob>,
    failures: Arc<AtomicU64>,
) {
    while let Some(job) = rx.recv().await {
        let result = match &job {
            WriteJob::AgentStatus { agent_id, status } => {
                store.set_agent_status(agent_id, *status).await
            }
            WriteJob::Heartbeat { agent_id } => {
                store.touch_heartbeat(agent_id, None, None).await.map(|_| ())
            }
            WriteJob::Capacity { agent_id, capacity } => {
                store.update_capacity(agent_id, capacity).await
            }
        };
        if let Err(e) = result {
            failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(?job, "Writeback failed: {e}");
        }
    }
}
