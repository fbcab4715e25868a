use thiserror::Error;

use crate::domain::RuntimeId;

/// Main error type for the runtime keeper
#[derive(Error, Debug)]
pub enum KeeperError {
    // Orchestration errors
    #[error("Process start is locked while another is starting")]
    AlreadyStarting,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Runtime {0} is not running")]
    NotRunning(RuntimeId),

    // Supervisor errors
    #[error("Invalid runtime configuration: {0}")]
    ConfigInvalid(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Runtime {0} did not accept a control message in time")]
    ControlTimeout(RuntimeId),

    // Source tree errors
    #[error("Could not parse strategy metadata: {0}")]
    ParseWarning(String),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl KeeperError {
    /// Build a `NotFound` for a runtime id
    pub fn runtime_not_found(id: RuntimeId) -> Self {
        KeeperError::NotFound(format!("runtime {}", id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KeeperError::NotFound(_))
    }
}

/// Result type alias for KeeperError
pub type Result<T> = std::result::Result<T, KeeperError>;
