//! Abstract quote-source capability.
//!
//! The fetch engine consumes this trait and switches on the returned
//! outcome variants; provider-specific errors never cross this boundary.
//! Only the loss of the source itself (bad configuration, impossible to
//! construct a client) surfaces as `Err`.

use async_trait::async_trait;
use ticker_core::QuoteRecord;

use crate::error::Result;

pub mod yahoo;

pub use yahoo::YahooQuoteSource;

/// Result for one symbol within a successful batch call.
#[derive(Debug, Clone)]
pub enum SymbolOutcome {
    /// The provider returned a usable record
    Record(QuoteRecord),
    /// Definitive per-symbol error (unknown symbol, malformed response);
    /// never retried
    Failed { symbol: String, reason: String },
}

impl SymbolOutcome {
    /// Symbol this outcome belongs to.
    pub fn symbol(&self) -> &str {
        match self {
            Self::Record(record) => &record.symbol,
            Self::Failed { symbol, .. } => symbol,
        }
    }
}

/// Outcome of one batch call to the quote source.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// The call went through; each symbol resolved to a record or a
    /// definitive failure
    Success(Vec<SymbolOutcome>),
    /// The provider throttled the batch; retry with backoff and track the
    /// episode
    Throttled(String),
    /// Network error, timeout, or provider 5xx; retry with backoff
    Transient(String),
}

/// Capability exposed by an external quote provider.
///
/// Implementations map provider-specific failures into [`BatchOutcome`]
/// variants; `Err` is reserved for catastrophic loss of the source.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch quotes for a batch of symbols.
    async fn fetch_batch(&self, symbols: &[String]) -> Result<BatchOutcome>;

    /// Cheap liveness probe for the health endpoint.
    async fn health_check(&self) -> bool;
}
