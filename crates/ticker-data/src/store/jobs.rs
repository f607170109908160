//! Job audit table.
//!
//! Every queue delivery that reaches execution is mirrored into
//! `job_queue`: PENDING on first sight, RUNNING while executing, SUCCESS
//! or FAILED at the end, and back to PENDING when a shutdown hands the
//! job to the broker for redelivery. Transitions are guarded both in Rust
//! (the [`JobStatus`] state machine) and in SQL (compare-and-set on the
//! current status).

use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use ticker_core::{JobMessage, JobStatus};

use crate::error::{DataError, Result};

/// One audit row.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: i32,
    /// JSON-encoded symbol list, as carried by the queue message
    pub ticker_list: String,
    pub execution_time: NaiveDateTime,
    pub retry_count: i32,
    pub status: String,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Audit access over the shared pool.
#[derive(Clone)]
pub struct JobAudit {
    pool: PgPool,
}

impl JobAudit {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the PENDING row for a delivery. Returns the row id.
    ///
    /// One row tracks a job across delivery attempts, keyed by `job_id`.
    /// A redelivery resets a non-terminal row to PENDING (a crash can
    /// strand it in RUNNING) and refreshes the retry counter. Redelivery
    /// of a terminal job is rejected so it is never re-run.
    pub async fn record_pending(&self, job: &JobMessage) -> Result<i32> {
        let ticker_list = serde_json::to_string(&job.ticker_list)?;

        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO job_queue
                (job_id, ticker_list, execution_time, retry_count, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'PENDING', NOW(), NOW())
            ON CONFLICT (job_id) DO UPDATE
            SET retry_count = EXCLUDED.retry_count,
                status = 'PENDING',
                updated_at = NOW()
            WHERE job_queue.status NOT IN ('SUCCESS', 'FAILED')
            RETURNING id
            "#,
        )
        .bind(job.job_id)
        .bind(&ticker_list)
        .bind(job.execution_time.naive_utc())
        .bind(job.retry_count as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((id,)) => {
                debug!(job_id = %job.job_id, row_id = id, "job audit row ready");
                Ok(id)
            }
            None => Err(DataError::InvalidData(format!(
                "job {} already reached a terminal status",
                job.job_id
            ))),
        }
    }

    /// Transition `row_id` from `from` to `to`.
    ///
    /// Illegal transitions are rejected before touching the database; a
    /// row whose stored status no longer matches `from` is rejected by the
    /// compare-and-set update.
    pub async fn transition(&self, row_id: i32, from: JobStatus, to: JobStatus) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(DataError::InvalidData(format!(
                "illegal job transition {} -> {}",
                from, to
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = $1, last_attempted_at = NOW(), updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(to.as_str())
        .bind(row_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::InvalidData(format!(
                "job row {} is not in state {}",
                row_id, from
            )));
        }

        debug!(row_id = row_id, from = %from, to = %to, "job transitioned");
        Ok(())
    }

    /// Whether a job already completed today in the given zone.
    ///
    /// Guards against double execution when the broker redelivers an
    /// already-processed message.
    pub async fn executed_today(&self, tz: Tz) -> Result<bool> {
        let now_local = chrono::Utc::now().with_timezone(&tz);
        let day_start = now_local.date_naive().and_time(chrono::NaiveTime::MIN);
        let day_end = day_start + chrono::Duration::days(1);

        // Day bounds are zone-local; convert to the naive-UTC storage form
        let start_utc = tz
            .from_local_datetime(&day_start)
            .earliest()
            .map(|dt| dt.naive_utc())
            .unwrap_or(day_start);
        let end_utc = tz
            .from_local_datetime(&day_end)
            .earliest()
            .map(|dt| dt.naive_utc())
            .unwrap_or(day_end);

        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM job_queue
                WHERE status = 'SUCCESS'
                  AND last_attempted_at >= $1
                  AND last_attempted_at < $2
            )
            "#,
        )
        .bind(start_utc)
        .bind(end_utc)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Fetch one audit row (test and operator tooling).
    pub async fn find(&self, row_id: i32) -> Result<JobRow> {
        let row: JobRow = sqlx::query_as(
            r#"
            SELECT id, ticker_list, execution_time, retry_count, status,
                   last_attempted_at, created_at
            FROM job_queue
            WHERE id = $1
            "#,
        )
        .bind(row_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
