//! Core domain types for the ticker-monitor collection pipeline.
//!
//! This crate holds everything the collector pipeline shares:
//! - Quote and OHLCV domain types (`domain::quote`)
//! - The queue job message and its audit state machine (`domain::job`)
//! - Business-day scheduling helpers (`domain::schedule`)
//! - The pipeline error taxonomy (`error`)
//! - Structured logging setup (`logging`)

pub mod domain;
pub mod error;
pub mod logging;

pub use domain::job::{JobMessage, JobStatus};
pub use domain::quote::{AssetType, DailyBar, Fundamentals, QuoteRecord};
pub use domain::schedule::{next_business_day, next_run_at, BusinessCalendar, WeekdayCalendar};
pub use error::{Result, TickerError};
