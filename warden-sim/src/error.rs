//! Simulation error types.

use thiserror::Error;
use warden_domain::DomainError;

/// Errors that can occur while simulating fills and positions.
#[derive(Debug, Error)]
pub enum SimError {
    /// Domain validation or math error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Simulation configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Order request is malformed for the configured fill model
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Tried to open a position from an unfilled entry
    #[error("Entry was not filled")]
    NotFilled,

    /// Operation on a simulator whose position is already closed
    #[error("Position already closed")]
    PositionClosed,

    /// Not enough market data to proceed
    #[error("No market data: {0}")]
    NoData(String),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;
