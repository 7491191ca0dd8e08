//! Error taxonomy for the orchestrator core.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid config: field '{field}' = '{value}': {reason}")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    #[error("service not found: {name}")]
    ServiceNotFound { name: String },

    #[error("binary not found: {path:?}")]
    BinaryNotFound { path: PathBuf },

    #[error("failed to spawn service '{name}': {cause}")]
    SpawnFailed { name: String, cause: String },

    #[error("failed to {stage} service '{name}'")]
    StopFailed { name: String, stage: String },

    #[error("orchestrator is shutting down")]
    ShuttingDown,

    #[error("auto-restart exhausted for '{name}' after {restarts} attempts")]
    BackoffExhausted { name: String, restarts: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
