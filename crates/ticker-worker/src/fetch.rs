//! Batched quote fetching with retry and rate-limit tracking.
//!
//! The engine slices a job's symbol list into fixed-size batches in input
//! order, paces them with an inter-batch delay, and retries each batch
//! with exponential backoff on transient failures and throttle signals.
//! Per-symbol errors never abort the run; exhausting the retry ceiling
//! marks the whole batch as permanently failed and moves on.
//!
//! Every sleep is cancellable: a shutdown signal aborts it immediately
//! and surfaces as [`WorkerError::Interrupted`] so the consumer can hand
//! the job back to the broker.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ticker_core::QuoteRecord;
use ticker_data::{BatchOutcome, QuoteSource, RateLimitSink, SymbolOutcome};

use crate::error::{Result, WorkerError};

/// Engine tuning, taken from the settings snapshot.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Symbols per quote-source call
    pub batch_size: usize,
    /// Pause between batches
    pub inter_batch_delay: Duration,
    /// Exponent base, in seconds
    pub backoff_base: u32,
    /// Backoff ceiling
    pub backoff_max: Duration,
    /// Attempts per batch before giving up
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_batch_delay: Duration::from_millis(300),
            backoff_base: 2,
            backoff_max: Duration::from_secs(3600),
            max_retries: 10,
        }
    }
}

/// What one run produced.
///
/// `successes` is in arrival order; together with `permanent_failures` it
/// covers the input set exactly, with no overlap.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub successes: Vec<QuoteRecord>,
    pub permanent_failures: Vec<String>,
}

/// Backoff before retry `attempt` (1-based): `min(max, base^attempt)`.
pub fn backoff_delay(base: u32, max: Duration, attempt: u32) -> Duration {
    (base as u64)
        .checked_pow(attempt)
        .map(Duration::from_secs)
        .unwrap_or(max)
        .min(max)
}

/// Batched fetcher over an abstract quote source.
pub struct FetchEngine<'a> {
    source: &'a dyn QuoteSource,
    tracker: &'a dyn RateLimitSink,
    config: FetchConfig,
}

impl<'a> FetchEngine<'a> {
    pub fn new(
        source: &'a dyn QuoteSource,
        tracker: &'a dyn RateLimitSink,
        config: FetchConfig,
    ) -> Self {
        Self {
            source,
            tracker,
            config,
        }
    }

    /// Fetch all symbols; never fails for per-symbol errors.
    ///
    /// `Err` means either the quote source itself is gone (catastrophic)
    /// or a shutdown interrupted the run.
    pub async fn fetch(
        &self,
        symbols: &[String],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<FetchReport> {
        let mut report = FetchReport::default();

        if symbols.is_empty() {
            info!("empty symbol list, nothing to fetch");
            return Ok(report);
        }

        let batches: Vec<&[String]> = symbols.chunks(self.config.batch_size.max(1)).collect();
        info!(
            symbols = symbols.len(),
            batches = batches.len(),
            "fetch started"
        );

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                cancellable_sleep(self.config.inter_batch_delay, shutdown).await?;
            }

            debug!(
                batch = index + 1,
                of = batches.len(),
                symbols = ?batch,
                "fetching batch"
            );

            match self.fetch_batch_with_retry(batch, shutdown).await? {
                Some(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            SymbolOutcome::Record(record) => report.successes.push(record),
                            SymbolOutcome::Failed { symbol, reason } => {
                                warn!(symbol = %symbol, reason = %reason, "symbol failed");
                                report.permanent_failures.push(symbol);
                            }
                        }
                    }
                }
                None => {
                    warn!(batch = index + 1, "batch exhausted retry ceiling");
                    report
                        .permanent_failures
                        .extend(batch.iter().cloned());
                }
            }
        }

        info!(
            successes = report.successes.len(),
            permanent_failures = report.permanent_failures.len(),
            "fetch complete"
        );
        Ok(report)
    }

    /// Retry one batch up to the ceiling. `None` means exhaustion.
    async fn fetch_batch_with_retry(
        &self,
        batch: &[String],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Vec<SymbolOutcome>>> {
        // Event ids for the throttle episode currently open on this batch
        let mut open_events: Vec<i32> = Vec::new();

        for attempt in 1..=self.config.max_retries {
            match self.source.fetch_batch(batch).await? {
                BatchOutcome::Success(outcomes) => {
                    self.close_events(&mut open_events).await;
                    return Ok(Some(outcomes));
                }
                BatchOutcome::Throttled(msg) => {
                    warn!(attempt = attempt, reason = %msg, "batch throttled");
                    // One ACTIVE event per symbol at a time: resolve the
                    // previous attempt's episode before opening the next
                    self.close_events(&mut open_events).await;
                    for symbol in batch {
                        match self.tracker.open(Some(symbol.as_str()), attempt).await {
                            Ok(event_id) => open_events.push(event_id),
                            Err(e) => {
                                warn!(symbol = %symbol, error = %e, "rate-limit tracking failed")
                            }
                        }
                    }
                }
                BatchOutcome::Transient(msg) => {
                    warn!(attempt = attempt, reason = %msg, "transient batch failure");
                }
            }

            if attempt == self.config.max_retries {
                break;
            }

            let delay = backoff_delay(self.config.backoff_base, self.config.backoff_max, attempt);
            debug!(attempt = attempt, delay_secs = delay.as_secs(), "backing off");
            cancellable_sleep(delay, shutdown).await?;
        }

        // Exhausted: the block never resolved, so its events stay ACTIVE
        Ok(None)
    }

    async fn close_events(&self, events: &mut Vec<i32>) {
        for event_id in events.drain(..) {
            if let Err(e) = self.tracker.close(event_id).await {
                warn!(event_id = event_id, error = %e, "rate-limit close failed");
            }
        }
    }
}

/// Sleep that aborts immediately when shutdown is signalled.
pub async fn cancellable_sleep(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = shutdown.wait_for(|&stop| stop) => Err(WorkerError::Interrupted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_schedule() {
        let max = Duration::from_secs(3600);
        assert_eq!(backoff_delay(2, max, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, max, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(2, max, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(2, max, 10), Duration::from_secs(1024));
    }

    #[test]
    fn test_backoff_delay_hits_ceiling() {
        let max = Duration::from_secs(3600);
        assert_eq!(backoff_delay(2, max, 12), Duration::from_secs(3600));
        assert_eq!(backoff_delay(2, max, 63), Duration::from_secs(3600));
        // Overflowing exponents saturate at the ceiling instead of panicking
        assert_eq!(backoff_delay(2, max, 64), Duration::from_secs(3600));
        assert_eq!(backoff_delay(10, Duration::from_secs(60), 30), Duration::from_secs(60));
    }
}
