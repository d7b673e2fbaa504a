//! Environment-driven configuration.
//!
//! All settings come from environment variables (a `.env` file is loaded by
//! the binary before parsing). Only `DATABASE_URL` is required.

use crate::error::ConfigError;

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    url: String,
    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?;
        let pool_size = parse_var("DATABASE_POOL_SIZE", 16)?;
        Ok(Self { url, pool_size })
    }

    pub fn new(url: impl Into<String>, pool_size: usize) -> Self {
        Self {
            url: url.into(),
            pool_size,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: std::env::var("STREAMHUB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("STREAMHUB_PORT", 8080)?,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            server: ServerConfig::from_env()?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(_) => Ok(default),
    }
}
