//! Queue job message and audit state machine.
//!
//! One `JobMessage` represents one scheduled collection run: the symbol
//! list plus the wall-clock time at which it should execute. Messages are
//! serialized to JSON on the wire; delivery is at-least-once, so consumers
//! must stay idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TickerError};

/// Message enqueued on the broker for one collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    /// Unique job id
    pub job_id: Uuid,
    /// Symbols to collect, in input order
    pub ticker_list: Vec<String>,
    /// When the job becomes due
    pub execution_time: DateTime<Utc>,
    /// Delivery attempts so far
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobMessage {
    /// Create a fresh job for the given symbols and due time.
    pub fn new(ticker_list: Vec<String>, execution_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            ticker_list,
            execution_time,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the next day's job: same symbols, fresh id, zero retries.
    pub fn successor(&self, next_execution: DateTime<Utc>) -> Self {
        Self::new(self.ticker_list.clone(), next_execution)
    }

    /// Copy with the retry counter incremented.
    pub fn retried(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Copy with a different due time (requeue past a non-business day).
    pub fn rescheduled(&self, execution_time: DateTime<Utc>) -> Self {
        Self {
            execution_time,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the wire.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| TickerError::Serialization(format!("invalid job message: {}", e)))
    }
}

/// Audit status of a job run.
///
/// `Pending → Running → Success | Failed`; a shutdown may return a running
/// job to `Pending` so the broker can redeliver it. Terminal states never
/// transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the job can never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Pending)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}
