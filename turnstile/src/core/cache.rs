//! Fail-soft JSON values in the limiter's store
//!
//! Small response caches usually live in the same Redis as the rate limit
//! buckets. [`JsonCache`] stores serde values there with an expiry and, like
//! the limiter, never lets a store problem reach the caller: a failed write
//! is dropped and a failed read is a miss.

use super::store::Store;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Expiry used by [`JsonCache::set`]
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// JSON cache over a shared [`Store`]
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use turnstile::{JsonCache, MemoryStore};
///
/// # tokio_test::block_on(async {
/// let cache = JsonCache::new(Arc::new(MemoryStore::new()));
/// cache.set("dashboard:stats", &vec![1, 2, 3]).await;
///
/// let stats: Option<Vec<u32>> = cache.get("dashboard:stats").await;
/// assert_eq!(stats, Some(vec![1, 2, 3]));
/// # });
/// ```
pub struct JsonCache<S: Store + ?Sized> {
    store: Arc<S>,
}

impl<S: Store + ?Sized> JsonCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        JsonCache { store }
    }

    /// Store `value` for [`DEFAULT_TTL`]
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.set_with_ttl(key, value, DEFAULT_TTL).await;
    }

    /// Store `value` for `ttl`; failures are logged and ignored
    pub async fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::debug!(key, error = %e, "Cache value not serializable");
                return;
            }
        };

        if let Err(e) = self.store.set_ex(key, &encoded, ttl).await {
            tracing::debug!(key, error = %e, "Cache set failed");
        }
    }

    /// Fetch and decode `key`; missing, expired, unreadable and undecodable
    /// entries are all `None`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::debug!(key, error = %e, "Cache get failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(key, error = %e, "Cache value not decodable");
                None
            }
        }
    }
}

impl<S: Store + ?Sized> Clone for JsonCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
