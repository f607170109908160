//! Environment-based configuration.
//!
//! Settings are loaded once at startup and never mutated; every component
//! receives the snapshot (or the slice of it) that it needs.

use chrono::NaiveTime;
use chrono_tz::Tz;
use std::time::Duration;

use ticker_core::logging::{LogConfig, LogFormat};
use ticker_core::{Result, TickerError};
use ticker_data::PoolConfig;

use crate::fetch::FetchConfig;

/// Immutable worker settings snapshot.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Daily HH:MM at which collection is due, in `timezone`
    pub execution_time: NaiveTime,
    /// IANA zone governing the schedule
    pub timezone: Tz,
    /// Symbols to collect, in configured order
    pub monitored_symbols: Vec<String>,
    /// Symbols per quote-source call
    pub batch_size: usize,
    /// Pause between batches
    pub inter_batch_delay_ms: u64,
    /// Exponent base for backoff, in seconds
    pub backoff_base: u32,
    /// Backoff ceiling
    pub backoff_max_seconds: u64,
    /// Retry ceiling, per batch and per job
    pub max_retries: u32,
    /// Postgres endpoint
    pub database_url: String,
    /// AMQP endpoint
    pub queue_url: String,
    /// Primary queue name; the DLQ is derived by suffixing `_dlq`
    pub queue_name: String,
    /// Base pool size
    pub db_pool_size: u32,
    /// Extra pool connections allowed under load
    pub db_max_overflow: u32,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load from the environment (and `.env` when present).
    ///
    /// Missing required keys and unparseable values are configuration
    /// errors, fatal at startup.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = require_env("DATABASE_URL")?;
        let queue_url = require_env("QUEUE_URL")?;
        let monitored_symbols = parse_symbols(&require_env("MONITORED_SYMBOLS")?)?;

        let execution_time =
            parse_execution_time(&env_var_or("EXECUTION_TIME", "16:30"))?;
        let timezone = parse_timezone(&env_var_or("TIMEZONE", "America/Sao_Paulo"))?;

        let log_format = env_var_or("LOG_FORMAT", "json")
            .parse::<LogFormat>()
            .map_err(TickerError::Config)?;

        Ok(Self {
            execution_time,
            timezone,
            monitored_symbols,
            batch_size: env_var_parse("BATCH_SIZE", 10),
            inter_batch_delay_ms: env_var_parse("INTER_BATCH_DELAY_MS", 300),
            backoff_base: env_var_parse("BACKOFF_BASE", 2),
            backoff_max_seconds: env_var_parse("BACKOFF_MAX_SECONDS", 3600),
            max_retries: env_var_parse("MAX_RETRIES", 10),
            database_url,
            queue_url,
            queue_name: env_var_or("QUEUE_NAME", "ticker_updates"),
            db_pool_size: env_var_parse("DB_POOL_SIZE", 10),
            db_max_overflow: env_var_parse("DB_MAX_OVERFLOW", 20),
            log_level: env_var_or("LOG_LEVEL", "info").to_lowercase(),
            log_format,
        })
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level.clone()).with_format(self.log_format)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.db_pool_size,
            max_overflow: self.db_max_overflow,
            ..PoolConfig::default()
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            batch_size: self.batch_size,
            inter_batch_delay: Duration::from_millis(self.inter_batch_delay_ms),
            backoff_base: self.backoff_base,
            backoff_max: Duration::from_secs(self.backoff_max_seconds),
            max_retries: self.max_retries,
        }
    }
}

/// Parse "HH:MM" into a wall-clock time.
pub fn parse_execution_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| TickerError::Config(format!("invalid EXECUTION_TIME '{}'", value)))
}

/// Parse an IANA zone name.
pub fn parse_timezone(value: &str) -> Result<Tz> {
    value
        .parse::<Tz>()
        .map_err(|_| TickerError::Config(format!("invalid TIMEZONE '{}'", value)))
}

/// Parse a comma-separated symbol list; empty lists are rejected.
pub fn parse_symbols(value: &str) -> Result<Vec<String>> {
    let symbols: Vec<String> = value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if symbols.is_empty() {
        return Err(TickerError::Config(
            "MONITORED_SYMBOLS must name at least one symbol".to_string(),
        ));
    }
    Ok(symbols)
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| TickerError::Config(format!("{} is not set", key)))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var, falling back to the default on absence or bad input.
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execution_time() {
        assert_eq!(
            parse_execution_time("16:30").unwrap(),
            NaiveTime::from_hms_opt(16, 30, 0).unwrap()
        );
        assert_eq!(
            parse_execution_time("09:05").unwrap(),
            NaiveTime::from_hms_opt(9, 5, 0).unwrap()
        );
        assert!(parse_execution_time("25:00").is_err());
        assert!(parse_execution_time("half past four").is_err());
    }

    #[test]
    fn test_parse_symbols() {
        assert_eq!(
            parse_symbols("PETR4.SA, VALE3.SA ,WEGE3.SA").unwrap(),
            vec!["PETR4.SA", "VALE3.SA", "WEGE3.SA"]
        );
        assert_eq!(parse_symbols("AAPL").unwrap(), vec!["AAPL"]);
        assert!(parse_symbols("").is_err());
        assert!(parse_symbols(" , ,").is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("America/Sao_Paulo").is_ok());
        assert!(parse_timezone("Asia/Seoul").is_ok());
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }
}
