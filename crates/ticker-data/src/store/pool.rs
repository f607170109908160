//! Bounded connection pool construction.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::error::{DataError, Result};

/// Pool sizing; the effective cap is `max_connections + max_overflow`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Base pool size
    pub max_connections: u32,
    /// Extra connections allowed under load
    pub max_overflow: u32,
    /// How long an acquire may wait before failing
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_overflow: 20,
            acquire_timeout_secs: 30,
        }
    }
}

impl PoolConfig {
    /// Total connection ceiling.
    pub fn cap(&self) -> u32 {
        self.max_connections + self.max_overflow
    }
}

/// Connect a bounded pool to the given database.
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.cap())
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
        .map_err(|e| DataError::ConnectionError(e.to_string()))?;

    info!(cap = config.cap(), "database pool connected");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_cap() {
        let config = PoolConfig::default();
        assert_eq!(config.cap(), 30);
    }
}
