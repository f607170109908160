//! Worker error type.

use thiserror::Error;
use ticker_core::TickerError;
use ticker_data::DataError;

/// Worker error.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Core pipeline error
    #[error("{0}")]
    Core(#[from] TickerError),

    /// Data-layer error
    #[error("{0}")]
    Data(#[from] DataError),

    /// Broker error
    #[error("queue error: {0}")]
    Queue(#[from] lapin::Error),

    /// Message encode/decode error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A shutdown signal aborted the operation
    #[error("shutdown in progress")]
    Interrupted,
}

impl WorkerError {
    /// Errors that should take the process down rather than the job.
    ///
    /// The orchestrator restarts the process; the broker redelivers the
    /// message.
    pub fn is_catastrophic(&self) -> bool {
        match self {
            WorkerError::Queue(_) => true,
            WorkerError::Data(DataError::PoolExhausted) => true,
            WorkerError::Data(DataError::ConnectionError(_)) => true,
            WorkerError::Core(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catastrophic_classification() {
        assert!(WorkerError::Data(DataError::PoolExhausted).is_catastrophic());
        assert!(WorkerError::Core(TickerError::Internal("boom".into())).is_catastrophic());

        assert!(!WorkerError::Interrupted.is_catastrophic());
        assert!(!WorkerError::Data(DataError::NotFound("x".into())).is_catastrophic());
        assert!(!WorkerError::Core(TickerError::RateLimited("429".into())).is_catastrophic());
    }
}
