//! Error types for alert storage and evaluation

use thiserror::Error;

/// Main error type for alert operations
#[derive(Error, Debug)]
pub enum AlertError {
    /// An alert or user failed validation before being written
    #[error("Invalid alert: {0}")]
    InvalidAlert(String),

    /// The backing database rejected or failed a query
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A store call did not finish within its deadline
    #[error("Store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The store cannot hand out a connection right now
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for AlertError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AlertError::Unavailable(err.to_string())
            }
            other => AlertError::Database(other),
        }
    }
}

/// Result type alias for alert operations
pub type Result<T> = std::result::Result<T, AlertError>;
