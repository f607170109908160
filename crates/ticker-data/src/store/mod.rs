//! Postgres persistence.
//!
//! All writes go through a single bounded pool shared by the quote store,
//! the rate-limit tracker, and the job audit. Timestamps cross the storage
//! boundary as timezone-naive UTC.

pub mod jobs;
pub mod pool;
pub mod quotes;
pub mod rate_limit;
