//! Dependency health probe.
//!
//! One synchronous check per dependency, combined into an overall
//! `healthy` flag. Orchestrators treat the JSON output as a liveness
//! signal.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ticker_data::{QuoteSource, QuoteStore};

use crate::queue::QueueManager;

/// Per-dependency probe results.
#[derive(Debug, Clone, Serialize)]
pub struct HealthComponents {
    pub database: bool,
    pub queue: bool,
    pub quote_source: bool,
}

/// Snapshot of system health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub components: HealthComponents,
    pub healthy: bool,
}

/// Probe every dependency.
pub async fn check(
    store: &QuoteStore,
    queue: &QueueManager,
    source: &dyn QuoteSource,
) -> HealthStatus {
    let components = HealthComponents {
        database: store.health_check().await,
        queue: queue.health_check(),
        quote_source: source.health_check().await,
    };

    let healthy = components.database && components.queue && components.quote_source;

    HealthStatus {
        timestamp: Utc::now(),
        components,
        healthy,
    }
}
