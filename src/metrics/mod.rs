pub mod cache;
pub mod cohort;
pub mod handler;
pub mod queries;
pub mod types;

use cache::MetricsCache;
use deadpool_sqlite::Pool;

/// Shared state for metrics endpoints.
pub struct MetricsState {
    pub pool: Pool,
    pub cache: MetricsCache,
}

impl MetricsState {
    pub fn new(pool: Pool, cache_ttl_secs: u64) -> Self {
        Self {
            pool,
            cache: MetricsCache::new(cache_ttl_secs),
        }
    }
}
