// Short-lived result cache in front of the flow endpoints

use crate::error::StoreError;
use crate::store::KvStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Matches the backend's own cache window; anything fresher would just
/// return the same data.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60);

const KEY_PREFIX: &str = "flowlens:flows";

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry<T> {
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
    data: T,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_RESULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key for one (device, client) selection.
    pub fn flow_key(device_id: &str, client_ip: Option<&str>) -> String {
        format!("{}:{}:{}", KEY_PREFIX, device_id, client_ip.unwrap_or("*"))
    }

    /// [`ResultCache::get_or_fetch_within`] using the configured TTL.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &str, fetcher: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_fetch_within(key, fetcher, self.ttl).await
    }

    /// Return the stored value for `key` if younger than `ttl`, otherwise
    /// call `fetcher` and store its result.
    ///
    /// Storage problems never surface: unreadable entries count as misses and
    /// failed writes (quota included) are logged and dropped. Fetch errors are
    /// returned unchanged.
    pub async fn get_or_fetch_within<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Duration,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(data) = self.lookup::<T>(key, ttl) {
            debug!("Result cache hit for {}", key);
            return Ok(data);
        }

        debug!("Result cache miss for {}", key);
        let data = fetcher().await?;
        self.store_entry(key, &data);
        Ok(data)
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read cached result {}: {}", key, e);
                return None;
            }
        };

        let entry: CachedEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Ignoring unreadable cache entry {}: {}", key, e);
                return None;
            }
        };

        let age_ms = now_millis() - entry.timestamp;
        if age_ms < ttl.as_millis() as i64 {
            Some(entry.data)
        } else {
            None
        }
    }

    fn store_entry<T: Serialize>(&self, key: &str, data: &T) {
        let entry = CachedEntry {
            timestamp: now_millis(),
            data,
        };
        let result = serde_json::to_string(&entry)
            .map_err(StoreError::from)
            .and_then(|raw| self.store.set(key, &raw));
        if let Err(e) = result {
            warn!("Could not cache result {}: {}", key, e);
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!("Could not invalidate cached result {}: {}", key, e);
        }
    }

    pub fn clear(&self) -> usize {
        match self.store.clear() {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Could not clear result cache: {}", e);
                0
            }
        }
    }
}
