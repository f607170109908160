//! Fetch engine behavior against a scripted quote source.
//!
//! Time-sensitive assertions run under tokio's paused clock, so the
//! backoff schedule is observed exactly instead of approximately.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use ticker_core::{AssetType, Fundamentals, QuoteRecord};
use ticker_data::{BatchOutcome, DataError, QuoteSource, RateLimitSink, SymbolOutcome};
use ticker_worker::{FetchConfig, FetchEngine, WorkerError};

/// One scripted reply from the fake provider.
#[derive(Debug, Clone)]
enum Step {
    /// Full success for every symbol in the batch
    Ok,
    /// Success, but the named symbols fail permanently
    Mixed(Vec<&'static str>),
    Throttle,
    Transient,
}

struct ScriptedSource {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn record(symbol: &str) -> QuoteRecord {
    QuoteRecord {
        symbol: symbol.to_string(),
        asset_type: AssetType::Stock,
        currency: "BRL".to_string(),
        last_price: dec!(38.91),
        volume: Some(1_000_000),
        observed_at: Utc::now(),
        fundamentals: Fundamentals {
            pe_ratio: Some(dec!(4.2)),
            ..Default::default()
        },
        history: Vec::new(),
    }
}

#[async_trait]
impl QuoteSource for ScriptedSource {
    async fn fetch_batch(&self, symbols: &[String]) -> Result<BatchOutcome, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok);

        let outcome = match step {
            Step::Ok => BatchOutcome::Success(
                symbols
                    .iter()
                    .map(|s| SymbolOutcome::Record(record(s)))
                    .collect(),
            ),
            Step::Mixed(bad) => BatchOutcome::Success(
                symbols
                    .iter()
                    .map(|s| {
                        if bad.contains(&s.as_str()) {
                            SymbolOutcome::Failed {
                                symbol: s.clone(),
                                reason: "symbol not found".to_string(),
                            }
                        } else {
                            SymbolOutcome::Record(record(s))
                        }
                    })
                    .collect(),
            ),
            Step::Throttle => BatchOutcome::Throttled("429 Too Many Requests".to_string()),
            Step::Transient => BatchOutcome::Transient("connection reset".to_string()),
        };
        Ok(outcome)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// In-memory sink capturing every open/close.
#[derive(Default)]
struct RecordingSink {
    opened: Mutex<Vec<(Option<String>, u32)>>,
    closed: Mutex<Vec<i32>>,
    next_id: AtomicI32,
}

impl RecordingSink {
    fn opened(&self) -> Vec<(Option<String>, u32)> {
        self.opened.lock().unwrap().clone()
    }

    fn closed(&self) -> Vec<i32> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RateLimitSink for RecordingSink {
    async fn open(&self, symbol: Option<&str>, retry_count: u32) -> Result<i32, DataError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.opened
            .lock()
            .unwrap()
            .push((symbol.map(str::to_string), retry_count));
        Ok(id)
    }

    async fn close(&self, event_id: i32) -> Result<(), DataError> {
        self.closed.lock().unwrap().push(event_id);
        Ok(())
    }
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn quick_config() -> FetchConfig {
    FetchConfig {
        batch_size: 10,
        inter_batch_delay: Duration::from_millis(300),
        backoff_base: 2,
        backoff_max: Duration::from_secs(3600),
        max_retries: 10,
    }
}

async fn run_engine(
    source: &ScriptedSource,
    sink: &RecordingSink,
    config: FetchConfig,
    input: &[String],
) -> Result<ticker_worker::FetchReport, WorkerError> {
    let engine = FetchEngine::new(source, sink, config);
    let (_tx, mut rx) = watch::channel(false);
    engine.fetch(input, &mut rx).await
}

/// Successes and permanent failures partition the input set exactly.
fn assert_partition(report: &ticker_worker::FetchReport, input: &[String]) {
    let mut seen: HashSet<&str> = HashSet::new();
    for record in &report.successes {
        assert!(seen.insert(record.symbol.as_str()), "duplicate {}", record.symbol);
    }
    for symbol in &report.permanent_failures {
        assert!(seen.insert(symbol.as_str()), "duplicate {}", symbol);
    }
    let input_set: HashSet<&str> = input.iter().map(String::as_str).collect();
    assert_eq!(seen, input_set);
}

#[tokio::test]
async fn happy_path_returns_every_symbol() {
    let source = ScriptedSource::new(vec![]);
    let sink = RecordingSink::default();
    let input = symbols(&["PETR4.SA", "VALE3.SA"]);

    let report = run_engine(&source, &sink, quick_config(), &input)
        .await
        .unwrap();

    assert_eq!(report.successes.len(), 2);
    assert!(report.permanent_failures.is_empty());
    assert_eq!(source.calls(), 1);
    assert!(sink.opened().is_empty());
    assert_partition(&report, &input);
}

#[tokio::test]
async fn per_symbol_failures_do_not_abort_the_run() {
    let source = ScriptedSource::new(vec![Step::Mixed(vec!["BOGUS.SA"])]);
    let sink = RecordingSink::default();
    let input = symbols(&["PETR4.SA", "BOGUS.SA", "WEGE3.SA"]);

    let report = run_engine(&source, &sink, quick_config(), &input)
        .await
        .unwrap();

    assert_eq!(report.successes.len(), 2);
    assert_eq!(report.permanent_failures, vec!["BOGUS.SA"]);
    assert_partition(&report, &input);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_waits_base_seconds_then_succeeds() {
    let source = ScriptedSource::new(vec![Step::Transient, Step::Ok]);
    let sink = RecordingSink::default();
    let input = symbols(&["PETR4.SA", "VALE3.SA"]);

    let started = tokio::time::Instant::now();
    let report = run_engine(&source, &sink, quick_config(), &input)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Exactly one wait of backoff_base^1 = 2 s
    assert_eq!(elapsed, Duration::from_secs(2));
    assert_eq!(report.successes.len(), 2);
    assert_eq!(source.calls(), 2);
    // No rate-limit episode for plain transient failures
    assert!(sink.opened().is_empty());
}

#[tokio::test(start_paused = true)]
async fn throttle_twice_then_success_tracks_episodes() {
    let source = ScriptedSource::new(vec![Step::Throttle, Step::Throttle, Step::Ok]);
    let sink = RecordingSink::default();
    let input = symbols(&["PETR4.SA", "VALE3.SA"]);

    let report = run_engine(&source, &sink, quick_config(), &input)
        .await
        .unwrap();

    assert_eq!(report.successes.len(), 2);

    // One event per symbol per throttled attempt: attempts 1 and 2
    let opened = sink.opened();
    assert_eq!(opened.len(), 4);
    for symbol in &input {
        let attempts: Vec<u32> = opened
            .iter()
            .filter(|(s, _)| s.as_deref() == Some(symbol.as_str()))
            .map(|(_, attempt)| *attempt)
            .collect();
        assert_eq!(attempts, vec![1, 2]);
    }

    // Every opened event was eventually resolved
    assert_eq!(sink.closed().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_marks_whole_batch_failed() {
    let source = ScriptedSource::new(vec![Step::Transient; 10]);
    let sink = RecordingSink::default();
    let input = symbols(&["PETR4.SA", "VALE3.SA", "WEGE3.SA"]);

    let started = tokio::time::Instant::now();
    let report = run_engine(&source, &sink, quick_config(), &input)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(report.successes.is_empty());
    assert_eq!(report.permanent_failures, input);
    assert_eq!(source.calls(), 10);
    assert_partition(&report, &input);

    // Nine waits between ten attempts: 2 + 4 + ... + 512 = 1022 s
    assert_eq!(elapsed, Duration::from_secs(1022));
}

#[tokio::test(start_paused = true)]
async fn exhausted_throttle_leaves_final_episode_active() {
    let source = ScriptedSource::new(vec![Step::Throttle; 10]);
    let sink = RecordingSink::default();
    let input = symbols(&["PETR4.SA"]);

    let report = run_engine(&source, &sink, quick_config(), &input)
        .await
        .unwrap();

    assert_eq!(report.permanent_failures, input);
    // Ten episodes opened; the last one never resolved
    assert_eq!(sink.opened().len(), 10);
    assert_eq!(sink.closed().len(), 9);
}

#[tokio::test]
async fn empty_symbol_list_is_zero_work() {
    let source = ScriptedSource::new(vec![]);
    let sink = RecordingSink::default();

    let report = run_engine(&source, &sink, quick_config(), &[]).await.unwrap();

    assert!(report.successes.is_empty());
    assert!(report.permanent_failures.is_empty());
    assert_eq!(source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn batch_size_one_paces_every_call() {
    let source = ScriptedSource::new(vec![]);
    let sink = RecordingSink::default();
    let input = symbols(&["A", "B", "C"]);

    let config = FetchConfig {
        batch_size: 1,
        ..quick_config()
    };

    let started = tokio::time::Instant::now();
    let report = run_engine(&source, &sink, config, &input).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.successes.len(), 3);
    assert_eq!(source.calls(), 3);
    // A delay before every batch but the first
    assert_eq!(elapsed, Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn backoff_respects_the_ceiling() {
    let source = ScriptedSource::new(vec![
        Step::Transient,
        Step::Transient,
        Step::Transient,
        Step::Transient,
        Step::Ok,
    ]);
    let sink = RecordingSink::default();
    let input = symbols(&["PETR4.SA"]);

    let config = FetchConfig {
        backoff_max: Duration::from_secs(4),
        ..quick_config()
    };

    let started = tokio::time::Instant::now();
    let report = run_engine(&source, &sink, config, &input).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.successes.len(), 1);
    // Waits: 2, then 4, 4, 4 (capped)
    assert_eq!(elapsed, Duration::from_secs(14));
}

#[tokio::test]
async fn shutdown_cancels_inter_batch_sleep() {
    let source = ScriptedSource::new(vec![]);
    let sink = RecordingSink::default();
    let input = symbols(&["A", "B"]);

    let config = FetchConfig {
        batch_size: 1,
        inter_batch_delay: Duration::from_secs(3600),
        ..quick_config()
    };

    let engine = FetchEngine::new(&source, &sink, config);
    let (tx, mut rx) = watch::channel(false);
    tx.send(true).unwrap();

    let result = engine.fetch(&input, &mut rx).await;

    assert!(matches!(result, Err(WorkerError::Interrupted)));
    // The first batch completed; the pause before the second was aborted
    assert_eq!(source.calls(), 1);
}
