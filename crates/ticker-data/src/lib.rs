//! Quote source adapter and persistence layer for ticker-monitor.
//!
//! Two halves:
//! - [`source`] — the abstract quote-source capability and its Yahoo
//!   Finance implementation
//! - [`store`] — Postgres persistence: quote records, rate-limit events,
//!   and the job audit table

pub mod error;
pub mod source;
pub mod store;

pub use error::{DataError, Result};
pub use source::{BatchOutcome, QuoteSource, SymbolOutcome, YahooQuoteSource};
pub use store::jobs::JobAudit;
pub use store::pool::{connect_pool, PoolConfig};
pub use store::quotes::{QuoteStore, SaveReport};
pub use store::rate_limit::{RateLimitEvent, RateLimitSink, RateLimitStats, RateLimitTracker};
