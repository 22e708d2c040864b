//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use spades_engine::controller::ControllerConfig;
use spades_engine::db::DatabaseConfig;
use spades_engine::matchmaking::QueueConfig;
use std::net::SocketAddr;

const DEFAULT_BIND: &str = "127.0.0.1:6969";

/// Where match, queue and lease state is kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Process-local stores; state is lost on restart
    InMemory,
    /// PostgreSQL through the engine's sqlx repositories
    Postgres,
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Prometheus scrape address; no exporter when unset
    pub metrics_bind: Option<SocketAddr>,
    pub backend: Backend,
    /// Database configuration, used by the Postgres backend
    pub database: DatabaseConfig,
    /// Turn timers, disconnect grace and bot settings
    pub controller: ControllerConfig,
    /// Bot fill and tier lease settings
    pub queue: QueueConfig,
    /// Pending seat views buffered per WebSocket subscriber
    pub broadcast_buffer: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Returns
    ///
    /// * `Result<ServerConfig, ConfigError>` - Loaded configuration or error
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr("SERVER_BIND")?.unwrap_or(default_bind()),
        };
        let metrics_bind = parse_addr("METRICS_BIND")?;

        let backend = match std::env::var("STORAGE_BACKEND").ok().as_deref() {
            None | Some("postgres") => Backend::Postgres,
            Some("memory") => Backend::InMemory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_BACKEND".to_string(),
                    reason: format!("expected \"postgres\" or \"memory\", got \"{other}\""),
                });
            }
        };

        let database_url = database_url_override
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or_else(|| DatabaseConfig::development().database_url);
        let database = DatabaseConfig::from_env_with_url(database_url).map_err(|reason| {
            ConfigError::Invalid {
                var: "DB_*".to_string(),
                reason,
            }
        })?;

        let controller = ControllerConfig::from_env().map_err(|reason| ConfigError::Invalid {
            var: "controller".to_string(),
            reason,
        })?;
        let queue = QueueConfig::from_env().map_err(|reason| ConfigError::Invalid {
            var: "queue".to_string(),
            reason,
        })?;

        Ok(ServerConfig {
            bind,
            metrics_bind,
            backend,
            database,
            controller,
            queue,
            broadcast_buffer: parse_env_or("BROADCAST_BUFFER", 32),
        })
    }

    /// Validate configuration after loading
    ///
    /// # Returns
    ///
    /// * `Result<(), ConfigError>` - Success or validation error
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                var: "controller".to_string(),
                reason,
            })?;
        self.queue.validate().map_err(|reason| ConfigError::Invalid {
            var: "queue".to_string(),
            reason,
        })?;

        if self.backend == Backend::Postgres && self.database.database_url.is_empty() {
            return Err(ConfigError::MissingRequired {
                var: "DATABASE_URL".to_string(),
                hint: "Pass --db-url, or --in-memory to run without a database".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Must not exceed DB_MAX_CONNECTIONS ({})",
                    self.database.max_connections
                ),
            });
        }

        if self.broadcast_buffer == 0 {
            return Err(ConfigError::Invalid {
                var: "BROADCAST_BUFFER".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: "Must differ from the server bind address".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_bind: None,
            backend: Backend::InMemory,
            database: DatabaseConfig::development(),
            controller: ControllerConfig::default(),
            queue: QueueConfig::default(),
            broadcast_buffer: 32,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6969))
}

fn parse_addr(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var: key.to_string(),
                reason: format!("\"{value}\" is not an IP:PORT address (e.g. {DEFAULT_BIND})"),
            }),
        Err(_) => Ok(None),
    }
}

/// Helper to parse environment variable with default fallback
pub fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
