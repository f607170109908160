//! Scheduler/consumer loop.
//!
//! The sole driver of work: one logical consumer against `ticker_updates`
//! with prefetch 1, so exactly one job is in flight. Each delivery is
//! gated on the configured daily wall-clock slot, executed (fetch →
//! persist → successor enqueue), and acknowledged. Handled failures
//! requeue the job with an incremented retry counter until the ceiling,
//! after which the message is dead-lettered and the audit row marked
//! FAILED.
//!
//! At-most-one-run-per-day rests on three legs: the wall-clock gate, the
//! single successor enqueued per completed job, and the executed-today
//! check against the audit table for redelivered duplicates.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ticker_core::{next_run_at, BusinessCalendar, JobMessage, JobStatus, WeekdayCalendar};
use ticker_data::{JobAudit, QuoteSource, QuoteStore, RateLimitSink, RateLimitTracker};

use crate::config::Settings;
use crate::error::{Result, WorkerError};
use crate::fetch::{backoff_delay, cancellable_sleep, FetchEngine};
use crate::queue::QueueManager;
use crate::stats::RunStats;

/// How long an early delivery is held before being requeued.
const POLL_DELAY: Duration = Duration::from_secs(30);

/// Soft deadline for the in-flight job once shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// What the wall-clock gate decided for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Due now; execute
    Run,
    /// Weekend or holiday; reschedule to the next business day
    NotBusinessDay,
    /// Scheduled time not reached; hold and requeue
    NotYetDue,
}

/// Gate a delivery on the configured zone's wall clock.
pub fn gate(
    calendar: &dyn BusinessCalendar,
    tz: Tz,
    now: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
) -> GateDecision {
    let local = now.with_timezone(&tz);
    if !calendar.is_business_day(local.date_naive()) {
        return GateDecision::NotBusinessDay;
    }
    if now < scheduled_at {
        return GateDecision::NotYetDue;
    }
    GateDecision::Run
}

/// The worker's single logical consumer.
pub struct Consumer {
    settings: Arc<Settings>,
    queue: Arc<QueueManager>,
    store: QuoteStore,
    tracker: RateLimitTracker,
    audit: JobAudit,
    source: Arc<dyn QuoteSource>,
    calendar: Arc<dyn BusinessCalendar>,
}

impl Consumer {
    pub fn new(
        settings: Arc<Settings>,
        queue: Arc<QueueManager>,
        pool: sqlx::PgPool,
        source: Arc<dyn QuoteSource>,
    ) -> Self {
        Self {
            settings,
            queue,
            store: QuoteStore::new(pool.clone()),
            tracker: RateLimitTracker::new(pool.clone()),
            audit: JobAudit::new(pool),
            source,
            calendar: Arc::new(WeekdayCalendar),
        }
    }

    /// Swap in a holiday-aware business calendar.
    pub fn with_calendar(mut self, calendar: Arc<dyn BusinessCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    /// Consume until shutdown. Returns `Err` only on catastrophic failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut deliveries = self.queue.consumer("ticker-worker").await?;
        info!("consumer waiting for jobs");

        loop {
            // Stop accepting new deliveries once shutdown is flagged
            let delivery = tokio::select! {
                biased;
                _ = shutdown.wait_for(|&stop| stop) => break,
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!(error = %e, "broker delivery failed");
                        return Err(e.into());
                    }
                    None => {
                        warn!("delivery stream closed by broker");
                        break;
                    }
                },
            };

            match self.handle_with_grace(delivery, &mut shutdown).await {
                Ok(()) => {}
                Err(WorkerError::Interrupted) => break,
                Err(e) if e.is_catastrophic() => {
                    error!(error = %e, "catastrophic failure, exiting");
                    return Err(e);
                }
                Err(e) => error!(error = %e, "delivery handling failed"),
            }
        }

        info!("consumer stopped");
        if let Err(e) = self.queue.close().await {
            warn!(error = %e, "broker close failed");
        }
        Ok(())
    }

    /// Run the handler; once shutdown fires, grant it a 30 s grace window
    /// before abandoning the delivery to broker redelivery.
    async fn handle_with_grace(
        &self,
        delivery: Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut handler_shutdown = shutdown.clone();
        let handle = self.handle_delivery(delivery, &mut handler_shutdown);
        tokio::pin!(handle);

        tokio::select! {
            result = &mut handle => result,
            _ = shutdown.wait_for(|&stop| stop) => {
                info!("shutdown signalled, finishing in-flight job");
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                    Ok(result) => result,
                    Err(_) => {
                        error!("grace deadline exceeded, job will be redelivered");
                        Err(WorkerError::Interrupted)
                    }
                }
            }
        }
    }

    async fn handle_delivery(
        &self,
        delivery: Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let job = match JobMessage::from_json(&delivery.data) {
            Ok(job) => job,
            Err(e) => {
                // Poison message; rejection dead-letters it via the DLX
                error!(error = %e, "undecodable message, dead-lettering");
                delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await?;
                return Ok(());
            }
        };

        info!(
            job_id = %job.job_id,
            tickers = job.ticker_list.len(),
            scheduled = %job.execution_time,
            attempt = job.retry_count + 1,
            "job received"
        );

        let tz = self.settings.timezone;
        match gate(
            self.calendar.as_ref(),
            tz,
            Utc::now(),
            job.execution_time,
        ) {
            GateDecision::NotBusinessDay => {
                let next = next_run_at(
                    self.calendar.as_ref(),
                    tz,
                    Utc::now(),
                    self.settings.execution_time,
                );
                info!(next = %next, "not a business day, rescheduling");
                self.queue.publish_job(&job.rescheduled(next)).await?;
                delivery.ack(BasicAckOptions::default()).await?;
                return Ok(());
            }
            GateDecision::NotYetDue => {
                debug!(scheduled = %job.execution_time, "not due yet, holding");
                if cancellable_sleep(POLL_DELAY, shutdown).await.is_err() {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await?;
                    return Err(WorkerError::Interrupted);
                }
                self.queue.publish_job(&job).await?;
                delivery.ack(BasicAckOptions::default()).await?;
                return Ok(());
            }
            GateDecision::Run => {}
        }

        // At-least-once delivery: drop duplicates of an already-completed run
        if self.audit.executed_today(tz).await.unwrap_or(false) {
            warn!(job_id = %job.job_id, "already executed today, dropping duplicate");
            delivery.ack(BasicAckOptions::default()).await?;
            return Ok(());
        }

        match self.execute_job(&job, shutdown).await {
            Ok(stats) => {
                stats.log_summary("collection");
                delivery.ack(BasicAckOptions::default()).await?;
                info!(job_id = %job.job_id, "job completed");
                Ok(())
            }
            Err(WorkerError::Interrupted) => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?;
                Err(WorkerError::Interrupted)
            }
            Err(e) if e.is_catastrophic() => {
                // Redelivered after the orchestrator restarts the process
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?;
                Err(e)
            }
            Err(e) => self.handle_job_failure(&job, delivery, e, shutdown).await,
        }
    }

    /// Run the pipeline under the audit state machine.
    async fn execute_job(
        &self,
        job: &JobMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunStats> {
        let started = Instant::now();
        let row_id = self.audit.record_pending(job).await?;
        self.audit
            .transition(row_id, JobStatus::Pending, JobStatus::Running)
            .await?;

        match self.run_pipeline(job, shutdown).await {
            Ok(mut stats) => {
                stats.elapsed = started.elapsed();
                // Completion is already acknowledged to the broker path;
                // an audit write failure must not fail the job
                if let Err(e) = self
                    .audit
                    .transition(row_id, JobStatus::Running, JobStatus::Success)
                    .await
                {
                    warn!(row_id = row_id, error = %e, "audit completion failed");
                }
                Ok(stats)
            }
            Err(WorkerError::Interrupted) => {
                // Back to PENDING so redelivery can pick it up after restart
                if let Err(e) = self
                    .audit
                    .transition(row_id, JobStatus::Running, JobStatus::Pending)
                    .await
                {
                    warn!(row_id = row_id, error = %e, "audit reversion failed");
                }
                Err(WorkerError::Interrupted)
            }
            Err(e) => {
                let final_attempt = job.retry_count >= self.settings.max_retries;
                let to = if final_attempt {
                    JobStatus::Failed
                } else {
                    JobStatus::Pending
                };
                if let Err(audit_err) = self
                    .audit
                    .transition(row_id, JobStatus::Running, to)
                    .await
                {
                    warn!(row_id = row_id, error = %audit_err, "audit failure update failed");
                }
                Err(e)
            }
        }
    }

    /// Fetch, persist, and enqueue the successor.
    async fn run_pipeline(
        &self,
        job: &JobMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunStats> {
        let mut stats = RunStats {
            total: job.ticker_list.len(),
            ..RunStats::new()
        };

        let engine = FetchEngine::new(
            self.source.as_ref(),
            &self.tracker,
            self.settings.fetch_config(),
        );
        let report = engine.fetch(&job.ticker_list, shutdown).await?;
        stats.fetched = report.successes.len();
        stats.fetch_failures = report.permanent_failures.len();

        let save = self.store.save_all(&report.successes).await;
        stats.saved = save.saved;
        stats.save_failures = save.failed.len();

        // Exactly one successor per completed job, on the next business day
        let next = next_run_at(
            self.calendar.as_ref(),
            self.settings.timezone,
            Utc::now(),
            self.settings.execution_time,
        );
        self.queue.publish_job(&job.successor(next)).await?;
        info!(next = %next, "successor job enqueued");

        Ok(stats)
    }

    /// Handled (non-catastrophic) job failure: requeue with an incremented
    /// retry counter, or dead-letter at the ceiling.
    async fn handle_job_failure(
        &self,
        job: &JobMessage,
        delivery: Delivery,
        err: WorkerError,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        error!(job_id = %job.job_id, error = %err, "job attempt failed");

        if job.retry_count < self.settings.max_retries {
            let retried = job.retried();
            let delay = backoff_delay(
                self.settings.backoff_base,
                Duration::from_secs(self.settings.backoff_max_seconds),
                retried.retry_count,
            );
            warn!(
                retry = retried.retry_count,
                max = self.settings.max_retries,
                delay_secs = delay.as_secs(),
                "requeueing job"
            );

            if cancellable_sleep(delay, shutdown).await.is_err() {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?;
                return Err(WorkerError::Interrupted);
            }

            // Publish the incremented copy before settling the original;
            // the copy supersedes it, so the original is acked, not nacked
            self.queue.publish_job(&retried).await?;
            delivery.ack(BasicAckOptions::default()).await?;
            Ok(())
        } else {
            error!(
                job_id = %job.job_id,
                retries = job.retry_count,
                "retry ceiling reached, dead-lettering"
            );
            // Record the exhausted run as a batch-wide block
            if let Err(e) = RateLimitSink::open(&self.tracker, None, job.retry_count).await {
                warn!(error = %e, "batch-wide rate-limit record failed");
            }
            // Rejection routes the message to the DLQ via the DLX
            delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await?;
            Ok(())
        }
    }
}
