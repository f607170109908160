//! Ticker monitor worker binary.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;

use ticker_core::logging::init_logging;
use ticker_core::JobMessage;
use ticker_data::{connect_pool, QuoteSource, QuoteStore, YahooQuoteSource};
use ticker_worker::{Consumer, QueueManager, Settings};

#[derive(Parser)]
#[command(name = "ticker-worker")]
#[command(about = "Queue-driven market data collection worker", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the consumer loop until shutdown
    Run,

    /// Declare queues and enqueue the initial job for the configured symbols
    Init,

    /// Probe dependencies and print a health report
    Health,
}

/// Exit codes: 0 graceful, 1 dependency failure, 2 configuration error.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&settings.log_config()) {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let result = match cli.command {
        Commands::Run => run(settings).await,
        Commands::Init => init(settings).await,
        Commands::Health => health(settings).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "worker exiting with failure");
        std::process::exit(1);
    }
}

/// Consumer daemon: consume jobs until SIGTERM/SIGINT.
async fn run(settings: Arc<Settings>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        symbols = settings.monitored_symbols.len(),
        execution_time = %settings.execution_time,
        timezone = %settings.timezone,
        "starting ticker monitor worker"
    );

    let pool = connect_pool(&settings.database_url, &settings.pool_config()).await?;
    let queue = Arc::new(QueueManager::connect(&settings.queue_url, &settings.queue_name).await?);
    let source: Arc<dyn QuoteSource> = Arc::new(YahooQuoteSource::new()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("termination signal received");
        let _ = shutdown_tx.send(true);
    });

    let consumer = Consumer::new(settings, queue, pool.clone(), source);
    let result = consumer.run(shutdown_rx).await;

    pool.close().await;
    tracing::info!("worker stopped");
    result.map_err(Into::into)
}

/// One-shot system bootstrap: verify dependencies, declare the queue
/// topology, and enqueue the first job at the current local time.
async fn init(settings: Arc<Settings>) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect_pool(&settings.database_url, &settings.pool_config()).await?;
    let queue = QueueManager::connect(&settings.queue_url, &settings.queue_name).await?;

    let job = JobMessage::new(settings.monitored_symbols.clone(), chrono::Utc::now());
    queue.publish_job(&job).await?;

    tracing::info!(
        job_id = %job.job_id,
        symbols = job.ticker_list.len(),
        "initial job enqueued"
    );

    queue.close().await?;
    pool.close().await;
    Ok(())
}

/// Probe dependencies and print the JSON report; non-zero exit when
/// anything is down.
async fn health(settings: Arc<Settings>) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect_pool(&settings.database_url, &settings.pool_config()).await?;
    let queue = QueueManager::connect(&settings.queue_url, &settings.queue_name).await?;
    let source = YahooQuoteSource::new()?;

    let store = QuoteStore::new(pool.clone());
    let status = ticker_worker::health::check(&store, &queue, &source).await;

    println!("{}", serde_json::to_string_pretty(&status)?);

    queue.close().await.ok();
    pool.close().await;

    if status.healthy {
        Ok(())
    } else {
        Err("one or more dependencies are unhealthy".into())
    }
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
