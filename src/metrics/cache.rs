use moka::sync::Cache;
use std::time::Duration;

/// Response cache keyed on `"{endpoint}:{window}"`, storing serialized JSON.
/// A zero TTL turns the cache off entirely.
pub struct MetricsCache {
    inner: Option<Cache<String, String>>,
}

impl MetricsCache {
    pub fn new(ttl_secs: u64) -> Self {
        let inner = (ttl_secs > 0).then(|| {
            Cache::builder()
                .time_to_live(Duration::from_secs(ttl_secs))
                .max_capacity(256)
                .build()
        });
        Self { inner }
    }

    pub fn cache_key(endpoint: &str, window: i64) -> String {
        format!("{endpoint}:{window}")
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.as_ref()?.get(key)
    }

    pub fn insert(&self, key: String, value: String) {
        if let Some(cache) = &self.inner {
            cache.insert(key, value);
        }
    }
}
