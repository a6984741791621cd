// swarm-autoscaler: Error types

use thiserror::Error;

/// Autoscaler result type
pub type Result<T> = std::result::Result<T, AutoscalerError>;

/// Autoscaler error types
#[derive(Debug, Error)]
pub enum AutoscalerError {
    #[error("Swarm API error: {0}")]
    Swarm(#[from] bollard::errors::Error),

    #[error("Service {0} is not in replicated mode")]
    NotReplicated(String),

    #[error("Invalid scaling bounds for service {service}: min={min} max={max} low={low} high={high}")]
    InvalidBounds {
        service: String,
        min: u64,
        max: u64,
        low: f64,
        high: f64,
    },

    #[error("Replica update for {service} still rejected after {attempts} attempts: {message}")]
    UpdateConflict {
        service: String,
        attempts: u32,
        message: String,
    },

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Event store error: {0}")]
    EventStore(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

/// Whether a swarm error is one of the transient update conflicts the
/// orchestrator raises when two writers race on the same service spec.
pub fn is_update_conflict(err: &bollard::errors::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("update out of sequence") || msg.contains("update in progress")
}
