//! Error taxonomy for the collection pipeline.
//!
//! Errors are classified at the boundary (quote source adapter, store,
//! broker client); the fetch engine and consumer reason only in terms of
//! these variants and never inspect driver errors directly.

use thiserror::Error;

/// Pipeline error.
#[derive(Debug, Error)]
pub enum TickerError {
    /// Missing or unparseable configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Network blip, provider 5xx, connection drop; retried with backoff
    #[error("network error: {0}")]
    Network(String),

    /// Explicit throttling from the quote provider
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Unknown symbol or malformed record; never retried
    #[error("data error: {0}")]
    Data(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Broker error
    #[error("queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Entity lookup miss
    #[error("not found: {0}")]
    NotFound(String),

    /// Unclassified failure; treated as catastrophic
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, TickerError>;

impl TickerError {
    /// Whether the error is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TickerError::Network(_) | TickerError::RateLimited(_) | TickerError::Database(_)
        )
    }

    /// Whether the error should abort the process rather than the job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TickerError::Config(_) | TickerError::Internal(_))
    }
}

impl From<serde_json::Error> for TickerError {
    fn from(err: serde_json::Error) -> Self {
        TickerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let network_err = TickerError::Network("timeout".to_string());
        assert!(network_err.is_retryable());

        let data_err = TickerError::Data("unknown symbol".to_string());
        assert!(!data_err.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        let config_err = TickerError::Config("missing DATABASE_URL".to_string());
        assert!(config_err.is_fatal());

        let throttle_err = TickerError::RateLimited("429".to_string());
        assert!(!throttle_err.is_fatal());
    }
}
