//! Rate-limit event tracking.
//!
//! Throttling episodes are recorded as rows that open ACTIVE and close
//! RESOLVED. A symbol has at most one ACTIVE event at a time; callers must
//! close an event before opening the next. Stale ACTIVE rows are tolerated
//! (there is no background sweeper).

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

use crate::error::{DataError, Result};

/// Write-side seam of the tracker, consumed by the fetch engine.
///
/// The engine only ever opens and closes episodes; reads stay on the
/// concrete [`RateLimitTracker`]. Tests substitute an in-memory sink.
#[async_trait]
pub trait RateLimitSink: Send + Sync {
    /// Open an ACTIVE event; `None` records a batch-wide episode.
    async fn open(&self, symbol: Option<&str>, retry_count: u32) -> Result<i32>;

    /// Resolve an event; a no-op when already resolved.
    async fn close(&self, event_id: i32) -> Result<()>;
}

/// One throttling episode.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitEvent {
    pub id: i32,
    /// NULL for batch-wide events and for symbols not yet in the master
    pub ticker_id: Option<i32>,
    /// Resolved symbol, when the master row exists
    pub symbol: Option<String>,
    pub blocked_at: NaiveDateTime,
    pub duration_seconds: Option<i32>,
    pub retry_count: i32,
    pub resolved_at: Option<NaiveDateTime>,
    pub status: String,
}

/// Per-symbol aggregate statistics.
#[derive(Debug, Clone, Default, FromRow)]
pub struct RateLimitStats {
    pub total_blocks: i64,
    pub active_count: i64,
    pub resolved_count: i64,
    pub avg_duration_seconds: Option<f64>,
    pub max_duration_seconds: Option<i32>,
    pub last_blocked_at: Option<NaiveDateTime>,
    pub max_retry_count: Option<i32>,
}

/// Tracker over the shared pool.
#[derive(Clone)]
pub struct RateLimitTracker {
    pool: PgPool,
}

impl RateLimitTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open an ACTIVE event for `symbol` (or a batch-wide event when
    /// `None`). Returns the event id.
    ///
    /// When the symbol resolves to a master row that already has an ACTIVE
    /// event, the call is rejected; the caller must close it first.
    pub async fn open(&self, symbol: Option<&str>, retry_count: u32) -> Result<i32> {
        let ticker_id = match symbol {
            Some(s) => self.resolve_ticker_id(s).await?,
            None => None,
        };

        if let Some(id) = ticker_id {
            let (already_active,): (bool,) = sqlx::query_as(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM rate_limit_events
                    WHERE ticker_id = $1 AND status = 'ACTIVE'
                )
                "#,
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

            if already_active {
                return Err(DataError::DuplicateError(format!(
                    "active rate-limit event already open for {}",
                    symbol.unwrap_or_default()
                )));
            }
        }

        let (event_id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO rate_limit_events
                (ticker_id, blocked_at, retry_count, status, created_at)
            VALUES ($1, NOW(), $2, 'ACTIVE', NOW())
            RETURNING id
            "#,
        )
        .bind(ticker_id)
        .bind(retry_count as i32)
        .fetch_one(&self.pool)
        .await?;

        warn!(
            symbol = symbol.unwrap_or("<batch>"),
            retry_count = retry_count,
            event_id = event_id,
            "rate limit recorded"
        );
        Ok(event_id)
    }

    /// Resolve an event: set `resolved_at`, derive `duration_seconds`,
    /// flip to RESOLVED. A no-op on an already-resolved event.
    pub async fn close(&self, event_id: i32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rate_limit_events
            SET resolved_at = NOW(),
                duration_seconds = FLOOR(EXTRACT(EPOCH FROM (NOW() - blocked_at)))::int,
                status = 'RESOLVED'
            WHERE id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(event_id = event_id, "rate-limit event resolved");
        }
        Ok(())
    }

    /// ACTIVE events, optionally filtered by symbol.
    pub async fn active(&self, symbol: Option<&str>) -> Result<Vec<RateLimitEvent>> {
        let events = match symbol {
            Some(s) => {
                sqlx::query_as(
                    r#"
                    SELECT e.id, e.ticker_id, t.symbol, e.blocked_at, e.duration_seconds,
                           e.retry_count, e.resolved_at, e.status
                    FROM rate_limit_events e
                    JOIN tickers t ON t.id = e.ticker_id
                    WHERE e.status = 'ACTIVE' AND t.symbol = $1
                    ORDER BY e.blocked_at DESC
                    "#,
                )
                .bind(s)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT e.id, e.ticker_id, t.symbol, e.blocked_at, e.duration_seconds,
                           e.retry_count, e.resolved_at, e.status
                    FROM rate_limit_events e
                    LEFT JOIN tickers t ON t.id = e.ticker_id
                    WHERE e.status = 'ACTIVE'
                    ORDER BY e.blocked_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(events)
    }

    /// Aggregate statistics for one symbol.
    pub async fn stats(&self, symbol: &str) -> Result<RateLimitStats> {
        let stats: Option<RateLimitStats> = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)                                        AS total_blocks,
                COUNT(*) FILTER (WHERE e.status = 'ACTIVE')     AS active_count,
                COUNT(*) FILTER (WHERE e.status = 'RESOLVED')   AS resolved_count,
                AVG(e.duration_seconds)::float8                 AS avg_duration_seconds,
                MAX(e.duration_seconds)                         AS max_duration_seconds,
                MAX(e.blocked_at)                               AS last_blocked_at,
                MAX(e.retry_count)                              AS max_retry_count
            FROM rate_limit_events e
            JOIN tickers t ON t.id = e.ticker_id
            WHERE t.symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stats.unwrap_or_default())
    }

    async fn resolve_ticker_id(&self, symbol: &str) -> Result<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT id FROM tickers WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        if row.is_none() {
            // Throttled before the first successful save; keep the event
            // with a NULL reference rather than dropping it
            warn!(symbol = symbol, "rate-limit event for unknown ticker");
        }
        Ok(row.map(|(id,)| id))
    }
}

#[async_trait]
impl RateLimitSink for RateLimitTracker {
    async fn open(&self, symbol: Option<&str>, retry_count: u32) -> Result<i32> {
        RateLimitTracker::open(self, symbol, retry_count).await
    }

    async fn close(&self, event_id: i32) -> Result<()> {
        RateLimitTracker::close(self, event_id).await
    }
}
