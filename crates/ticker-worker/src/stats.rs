//! Per-run collection statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statistics for one collection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Symbols in the job
    pub total: usize,
    /// Records returned by the quote source
    pub fetched: usize,
    /// Symbols marked as permanent fetch failures
    pub fetch_failures: usize,
    /// Records committed to the store
    pub saved: usize,
    /// Records whose transaction rolled back
    pub save_failures: usize,
    /// Wall-clock duration of the run
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of symbols fully collected and saved, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.saved as f64 / self.total as f64) * 100.0
        }
    }

    /// Emit a structured summary line.
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            fetched = self.fetched,
            fetch_failures = self.fetch_failures,
            saved = self.saved,
            save_failures = self.save_failures,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "run complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let stats = RunStats {
            total: 4,
            saved: 3,
            ..Default::default()
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);

        assert_eq!(RunStats::default().success_rate(), 0.0);
    }
}
