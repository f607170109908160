//! Quote record persistence.
//!
//! Each record commits in its own transaction: symbol upsert, price
//! sample, fundamentals when present, and history bars keyed by
//! `(ticker_id, date)`. One record's failure never affects another.
//!
//! Price samples and fundamentals are append-only; re-running a save adds
//! rows. History bars are idempotent: a re-seen `(ticker_id, date)` is a
//! no-op, so callers may replay a whole job safely.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument};

use ticker_core::QuoteRecord;

use crate::error::{DataError, Result};

/// Outcome of a `save_all` pass.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Records fully committed
    pub saved: usize,
    /// Symbols whose transaction rolled back
    pub failed: Vec<String>,
}

/// Persistence service for quote records.
#[derive(Clone)]
pub struct QuoteStore {
    pool: PgPool,
}

impl QuoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Save every record, one transaction each.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn save_all(&self, records: &[QuoteRecord]) -> SaveReport {
        let mut report = SaveReport::default();

        for record in records {
            match self.save_record(record).await {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    error!(symbol = %record.symbol, error = %e, "save failed");
                    report.failed.push(record.symbol.clone());
                }
            }
        }

        info!(
            saved = report.saved,
            failed = report.failed.len(),
            "persistence pass complete"
        );
        report
    }

    /// Save one record in a single ACID transaction.
    pub async fn save_record(&self, record: &QuoteRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let ticker_id = ensure_ticker(&mut tx, record).await?;
        insert_price(&mut tx, ticker_id, record).await?;

        if !record.fundamentals.is_empty() {
            insert_fundamentals(&mut tx, ticker_id, record).await?;
        }

        if !record.history.is_empty() {
            upsert_history(&mut tx, ticker_id, record).await?;
        }

        tx.commit().await?;
        debug!(symbol = %record.symbol, "record saved");
        Ok(())
    }

    /// Most recent price sample for a symbol (read-side dedupe of the
    /// append-only samples).
    pub async fn latest_price(&self, symbol: &str) -> Result<Option<(Decimal, DateTime<Utc>)>> {
        let row: Option<(Decimal, NaiveDateTime)> = sqlx::query_as(
            r#"
            SELECT p.price, p.observed_at
            FROM ticker_prices p
            JOIN tickers t ON t.id = p.ticker_id
            WHERE t.symbol = $1
            ORDER BY p.observed_at DESC, p.id DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(price, observed_at)| (price, observed_at.and_utc())))
    }

    /// Number of history bars stored for a symbol.
    pub async fn history_count(&self, symbol: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM ticker_history h
            JOIN tickers t ON t.id = h.ticker_id
            WHERE t.symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Liveness probe for the health endpoint.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Insert the symbol master row if new, and return its id either way.
async fn ensure_ticker(
    tx: &mut Transaction<'_, Postgres>,
    record: &QuoteRecord,
) -> Result<i32> {
    let inserted: Option<(i32,)> = sqlx::query_as(
        r#"
        INSERT INTO tickers (symbol, asset_type, currency, created_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (symbol) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&record.symbol)
    .bind(record.asset_type.as_str())
    .bind(&record.currency)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some((id,)) = inserted {
        debug!(symbol = %record.symbol, id = id, "new ticker created");
        return Ok(id);
    }

    let (id,): (i32,) = sqlx::query_as("SELECT id FROM tickers WHERE symbol = $1")
        .bind(&record.symbol)
        .fetch_one(&mut **tx)
        .await?;
    Ok(id)
}

async fn insert_price(
    tx: &mut Transaction<'_, Postgres>,
    ticker_id: i32,
    record: &QuoteRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ticker_prices (ticker_id, price, volume, observed_at, created_at)
        VALUES ($1, $2, $3, $4, NOW())
        "#,
    )
    .bind(ticker_id)
    .bind(record.last_price)
    .bind(record.volume)
    .bind(record.observed_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_fundamentals(
    tx: &mut Transaction<'_, Postgres>,
    ticker_id: i32,
    record: &QuoteRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ticker_fundamentals
            (ticker_id, pe_ratio, eps, dividend_yield, market_cap, collected_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#,
    )
    .bind(ticker_id)
    .bind(record.fundamentals.pe_ratio)
    .bind(record.fundamentals.eps)
    .bind(record.fundamentals.dividend_yield)
    .bind(record.fundamentals.market_cap)
    .bind(record.observed_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Bulk-insert history bars with UNNEST; already-seen dates do nothing.
async fn upsert_history(
    tx: &mut Transaction<'_, Postgres>,
    ticker_id: i32,
    record: &QuoteRecord,
) -> Result<()> {
    for chunk in record.history.chunks(500) {
        let ticker_ids: Vec<i32> = chunk.iter().map(|_| ticker_id).collect();
        let dates: Vec<NaiveDate> = chunk.iter().map(|b| b.date).collect();
        let opens: Vec<Decimal> = chunk.iter().map(|b| b.open).collect();
        let highs: Vec<Decimal> = chunk.iter().map(|b| b.high).collect();
        let lows: Vec<Decimal> = chunk.iter().map(|b| b.low).collect();
        let closes: Vec<Decimal> = chunk.iter().map(|b| b.close).collect();
        let volumes: Vec<Option<i64>> = chunk.iter().map(|b| b.volume).collect();

        sqlx::query(
            r#"
            INSERT INTO ticker_history
                (ticker_id, date, open, high, low, close, volume, created_at)
            SELECT * FROM UNNEST(
                $1::int[], $2::date[],
                $3::numeric[], $4::numeric[], $5::numeric[], $6::numeric[],
                $7::bigint[]
            ), NOW()
            ON CONFLICT (ticker_id, date) DO NOTHING
            "#,
        )
        .bind(&ticker_ids)
        .bind(&dates)
        .bind(&opens)
        .bind(&highs)
        .bind(&lows)
        .bind(&closes)
        .bind(&volumes)
        .execute(&mut **tx)
        .await
        .map_err(|e| DataError::InsertError(e.to_string()))?;
    }

    debug!(
        ticker_id = ticker_id,
        bars = record.history.len(),
        "history upserted"
    );
    Ok(())
}
