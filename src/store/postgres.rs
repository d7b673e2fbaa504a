//! PostgreSQL store for agents and agent commands.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;
use crate::model::{
    Agent, AgentCapacity, AgentCommand, AgentStatus, CommandAction, CommandStatus, Platform,
};
use crate::store::{AgentFilter, AgentRegistration, ControlStore, NewCommand};

const SCHEMA_SQL: &str = include_str!("../../migrations/schema.sql");

const AGENT_COLUMNS: &str = "id, agent_id, platform, region, status, capacity, \
     last_heartbeat, websocket_id, metadata, created_at, updated_at";

const COMMAND_COLUMNS: &str = "id, command_id, agent_id, session_id, action, payload, status, \
     error_message, created_at, sent_at, acknowledged_at, completed_at";

/// Store backed by a deadpool-postgres connection pool.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create a new store and verify connectivity.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Apply the schema. Idempotent (`CREATE TABLE IF NOT EXISTS` throughout);
    /// real migration history is managed externally.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        tracing::info!("Applied database schema");
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

/// SQL guard admitting only the statuses from which `next` is reachable,
/// per the `CommandStatus` transition table.
fn transition_guard(next: CommandStatus) -> String {
    let sources: Vec<String> = CommandStatus::transition_sources(next)
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    format!("status IN ({})", sources.join(", "))
}

fn agent_from_row(row: &Row) -> Result<Agent, DatabaseError> {
    let platform_raw: String = row.try_get("platform")?;
    let platform = Platform::parse(&platform_raw).ok_or(DatabaseError::Decode {
        column: "platform",
        value: platform_raw,
    })?;

    let status_raw: String = row.try_get("status")?;
    let status = AgentStatus::parse(&status_raw).ok_or(DatabaseError::Decode {
        column: "status",
        value: status_raw,
    })?;

    let capacity = row
        .try_get::<_, Option<serde_json::Value>>("capacity")?
        .map(serde_json::from_value::<AgentCapacity>)
        .transpose()?;

    Ok(Agent {
        id: row.try_get("id")?,
        agent_id: row.try_get("agent_id")?,
        platform,
        region: row.try_get("region")?,
        status,
        capacity,
        last_heartbeat: row.try_get("last_heartbeat")?,
        websocket_id: row.try_get("websocket_id")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn command_from_row(row: &Row) -> Result<AgentCommand, DatabaseError> {
    let action_raw: String = row.try_get("action")?;
    let action = CommandAction::parse(&action_raw).ok_or(DatabaseError::Decode {
        column: "action",
        value: action_raw,
    })?;

    let status_raw: String = row.try_get("status")?;
    let status = CommandStatus::parse(&status_raw).ok_or(DatabaseError::Decode {
        column: "status",
        value: status_raw,
    })?;

    Ok(AgentCommand {
        id: row.try_get("id")?,
        command_id: row.try_get("command_id")?,
        agent_id: row.try_get("agent_id")?,
        session_id: row.try_get("session_id")?,
        action,
        payload: row.try_get("payload")?,
        status,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl ControlStore for PgStore {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1"),
                &[&agent_id],
            )
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>, DatabaseError> {
        let conn = self.conn().await?;
        // NULL filter parameters match everything.
        let platform = filter.platform.map(|p| p.as_str());
        let status = filter.status.map(|s| s.as_str());
        let rows = conn
            .query(
                &format!(
                    "SELECT {AGENT_COLUMNS} FROM agents \
                     WHERE ($1::text IS NULL OR platform = $1) \
                       AND ($2::text IS NULL OR status = $2) \
                       AND ($3::text IS NULL OR region = $3) \
                     ORDER BY agent_id"
                ),
                &[&platform, &status, &filter.region],
            )
            .await?;
        rows.iter().map(agent_from_row).collect()
    }

    async fn upsert_agent(&self, reg: &AgentRegistration) -> Result<(Agent, bool), DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let capacity = reg.capacity.as_ref().map(serde_json::to_value).transpose()?;

        let existing = conn
            .query_opt("SELECT id FROM agents WHERE agent_id = $1", &[&reg.agent_id])
            .await?;

        let (row, created) = match existing {
            None => {
                let row = conn
                    .query_one(
                        &format!(
                            "INSERT INTO agents \
                                 (id, agent_id, platform, region, status, capacity, \
                                  last_heartbeat, metadata, created_at, updated_at) \
                             VALUES ($1, $2, $3, $4, 'online', $5, $6, $7, $6, $6) \
                             RETURNING {AGENT_COLUMNS}"
                        ),
                        &[
                            &Uuid::new_v4(),
                            &reg.agent_id,
                            &reg.platform.as_str(),
                            &reg.region,
                            &capacity,
                            &now,
                            &reg.metadata,
                        ],
                    )
                    .await?;
                (row, true)
            }
            Some(_) => {
                let row = conn
                    .query_one(
                        &format!(
                            "UPDATE agents \
                             SET platform = $2, region = $3, status = 'online', capacity = $4, \
                                 last_heartbeat = $5, metadata = $6, updated_at = $5 \
                             WHERE agent_id = $1 \
                             RETURNING {AGENT_COLUMNS}"
                        ),
                        &[
                            &reg.agent_id,
                            &reg.platform.as_str(),
                            &reg.region,
                            &capacity,
                            &now,
                            &reg.metadata,
                        ],
                    )
                    .await?;
                (row, false)
            }
        };

        Ok((agent_from_row(&row)?, created))
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .execute("DELETE FROM agents WHERE agent_id = $1", &[&agent_id])
            .await?;
        Ok(rows > 0)
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        if status == AgentStatus::Online {
            conn.execute(
                "UPDATE agents SET status = 'online', last_heartbeat = $1, updated_at = $1 \
                 WHERE agent_id = $2",
                &[&now, &agent_id],
            )
            .await?;
        } else {
            conn.execute(
                "UPDATE agents SET status = $1, updated_at = $2 WHERE agent_id = $3",
                &[&status.as_str(), &now, &agent_id],
            )
            .await?;
        }
        Ok(())
    }

    async fn touch_heartbeat(
        &self,
        agent_id: &str,
        status: Option<AgentStatus>,
        capacity: Option<&AgentCapacity>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let status = status.map(|s| s.as_str());
        let capacity = capacity.map(serde_json::to_value).transpose()?;
        let rows = conn
            .execute(
                "UPDATE agents \
                 SET last_heartbeat = $1, \
                     status = COALESCE($2, status), \
                     capacity = COALESCE($3, capacity), \
                     updated_at = $1 \
                 WHERE agent_id = $4",
                &[&now, &status, &capacity, &agent_id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn update_capacity(&self, agent_id: &str, capacity: &AgentCapacity) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let capacity = serde_json::to_value(capacity)?;
        conn.execute(
            "UPDATE agents SET capacity = $1, updated_at = $2 WHERE agent_id = $3",
            &[&capacity, &now, &agent_id],
        )
        .await?;
        Ok(())
    }

    async fn create_command(&self, command: &NewCommand) -> Result<AgentCommand, DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO agent_commands \
                         (id, command_id, agent_id, session_id, action, payload, status, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7) \
                     RETURNING {COMMAND_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &command.command_id,
                    &command.agent_id,
                    &command.session_id,
                    &command.action.as_str(),
                    &command.payload,
                    &now,
                ],
            )
            .await?;
        command_from_row(&row)
    }

    async fn get_command(&self, command_id: &str) -> Result<Option<AgentCommand>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {COMMAND_COLUMNS} FROM agent_commands WHERE command_id = $1"),
                &[&command_id],
            )
            .await?;
        row.as_ref().map(command_from_row).transpose()
    }

    async fn list_commands(&self, agent_id: &str, limit: i64) -> Result<Vec<AgentCommand>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {COMMAND_COLUMNS} FROM agent_commands \
                     WHERE agent_id = $1 ORDER BY created_at DESC LIMIT $2"
                ),
                &[&agent_id, &limit],
            )
            .await?;
        rows.iter().map(command_from_row).collect()
    }

    async fn mark_sent(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let guard = transition_guard(CommandStatus::Sent);
        Ok(conn
            .execute(
                &format!(
                    "UPDATE agent_commands SET status = 'sent', sent_at = $1 \
                     WHERE command_id = $2 AND agent_id = $3 AND {guard}"
                ),
                &[&now, &command_id, &agent_id],
            )
            .await?)
    }

    async fn mark_acked(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let guard = transition_guard(CommandStatus::Ack);
        Ok(conn
            .execute(
                &format!(
                    "UPDATE agent_commands SET status = 'ack', acknowledged_at = $1 \
                     WHERE command_id = $2 AND agent_id = $3 AND {guard}"
                ),
                &[&now, &command_id, &agent_id],
            )
            .await?)
    }

    async fn mark_completed(&self, command_id: &str, agent_id: &str) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let guard = transition_guard(CommandStatus::Completed);
        Ok(conn
            .execute(
                &format!(
                    "UPDATE agent_commands SET status = 'completed', completed_at = $1 \
                     WHERE command_id = $2 AND agent_id = $3 AND {guard}"
                ),
                &[&now, &command_id, &agent_id],
            )
            .await?)
    }

    async fn mark_failed(
        &self,
        command_id: &str,
        agent_id: &str,
        error: &str,
    ) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let guard = transition_guard(CommandStatus::Failed);
        Ok(conn
            .execute(
                &format!(
                    "UPDATE agent_commands \
                     SET status = 'failed', error_message = $1, completed_at = $2 \
                     WHERE command_id = $3 AND agent_id = $4 AND {guard}"
                ),
                &[&error, &now, &command_id, &agent_id],
            )
            .await?)
    }
}
