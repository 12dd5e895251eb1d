//! Error types for idempotent consumer library

use resilience::TimeoutError;
use std::time::Duration;
use thiserror::Error;

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur while talking to the deduplication store
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Redis command failed (connection refused, protocol error, etc.)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store did not answer within the command timeout
    #[error("Dedup store timed out after {0:?}")]
    Timeout(Duration),

    /// Store rejected the operation for a non-Redis reason
    #[error("Dedup store unavailable: {0}")]
    Unavailable(String),
}

impl IdempotencyError {
    /// Check if error is transient (store may recover on its own)
    pub fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Redis(err) => {
                err.is_io_error() || err.is_connection_dropped() || err.is_timeout()
            }
            IdempotencyError::Timeout(_) | IdempotencyError::Unavailable(_) => true,
        }
    }
}

impl From<TimeoutError<redis::RedisError>> for IdempotencyError {
    fn from(err: TimeoutError<redis::RedisError>) -> Self {
        match err {
            TimeoutError::Elapsed(duration) => IdempotencyError::Timeout(duration),
            TimeoutError::Failed(err) => IdempotencyError::Redis(err),
        }
    }
}
