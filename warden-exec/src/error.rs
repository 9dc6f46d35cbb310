//! Execution layer error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during execution operations.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// Order failed pre-flight validation and never left the process
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Temporary exchange or network failure
    #[error("Transient exchange error: {0}")]
    Transient(String),

    /// Exchange rate limit (HTTP 429)
    #[error("Rate limited by exchange (retry after {retry_after:?})")]
    RateLimited {
        /// Exchange-suggested wait, if provided
        retry_after: Option<Duration>,
    },

    /// Timeout waiting for the exchange
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Order was rejected by exchange
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Stop state could not be written to durable storage
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Symbol is not tracked by the coordinator
    #[error("Symbol not tracked: {0}")]
    NotTracked(String),

    /// Protection could not be restored; the position was market-closed
    #[error("Stop protection lost for {symbol}: emergency close executed (order {order_id})")]
    EmergencyCloseExecuted {
        /// Closed symbol
        symbol: String,
        /// Exchange ID of the close order
        order_id: String,
    },

    /// Protection lost and the emergency close failed too
    ///
    /// **Position may be open without a stop. Requires a human.**
    #[error("FATAL: emergency close failed for {symbol}: {reason}")]
    EmergencyCloseFailed {
        /// Affected symbol
        symbol: String,
        /// Underlying failure
        reason: String,
    },

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] warden_domain::DomainError),
}

impl ExecError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Transient(_) | ExecError::RateLimited { .. } | ExecError::Timeout(_)
        )
    }

    /// Whether the error must stop all automated handling of the position.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::EmergencyCloseFailed { .. })
    }

    /// Exchange-suggested wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExecError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ExecError::Transient("502".into()).is_retryable());
        assert!(ExecError::Timeout("10s".into()).is_retryable());
        assert!(ExecError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ExecError::Validation("reduce_only".into()).is_retryable());
        assert!(!ExecError::OrderRejected("insufficient margin".into()).is_retryable());

        let fatal = ExecError::EmergencyCloseFailed {
            symbol: "ETHUSDTM".into(),
            reason: "timeout".into(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = ExecError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(ExecError::Transient("x".into()).retry_after(), None);
    }

    #[test]
    fn test_emergency_close_message() {
        let err = ExecError::EmergencyCloseExecuted {
            symbol: "ETHUSDTM".into(),
            order_id: "STUB-9".into(),
        };
        assert!(err.to_string().contains("emergency close executed"));
    }
}
