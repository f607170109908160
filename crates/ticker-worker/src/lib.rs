//! Queue-driven market data collection worker.
//!
//! One queue message is one collection job: a symbol list plus the
//! wall-clock time at which it should run. The consumer gates each
//! delivery on the configured daily slot, fetches quotes in paced
//! batches with exponential-backoff retry, persists them under ACID,
//! and enqueues the next business day's job before acknowledging.

pub mod config;
pub mod consumer;
pub mod error;
pub mod fetch;
pub mod health;
pub mod queue;
pub mod stats;

pub use config::Settings;
pub use consumer::Consumer;
pub use error::{Result, WorkerError};
pub use fetch::{FetchConfig, FetchEngine, FetchReport};
pub use queue::QueueManager;
pub use stats::RunStats;
