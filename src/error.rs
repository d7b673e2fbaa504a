//! Error types for the control plane hub.

/// Errors from the durable agent/command store.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Pool construction failed.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Checking out a pooled connection failed.
    #[error("pool checkout failed: {0}")]
    Checkout(#[from] deadpool_postgres::PoolError),

    /// A query or statement failed.
    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Encoding a JSONB column value failed.
    #[error("failed to encode JSON value: {0}")]
    Encode(#[from] serde_json::Error),

    /// A stored text column held a value outside its closed enum.
    #[error("invalid {column} value in row: {value}")]
    Decode { column: &'static str, value: String },
}

/// Errors surfaced by the command dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The target agent has no live connection in the hub.
    #[error("agent {agent_id} is not connected")]
    NotConnected { agent_id: String },

    /// The target connection's outbound queue is full or already torn down.
    #[error("outbound queue unavailable for agent {agent_id}")]
    QueueUnavailable { agent_id: String },

    /// The command could not be serialized into a wire frame.
    #[error("failed to encode command frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// Persisting the sent transition failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// An environment variable holds an unparseable value.
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}
