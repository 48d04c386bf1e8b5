use super::{ScriptRef, Store};
use crate::core::StoreError;
use crate::core::bucket::{BucketState, TokenBucket};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::{Duration, SystemTime};

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

// Configuration constants
const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// In-process store with the same semantics as [`RedisStore`](super::RedisStore)
///
/// Every script run happens under one mutex, so updates to a bucket are
/// strictly serialized. State lives only in this process: two server
/// instances each using a `MemoryStore` do not share buckets.
///
/// Bucket expiry is measured on the timeline of the timestamps passed to
/// [`Store::run_script`]. Expired buckets behave as absent immediately and
/// are swept from memory at fixed intervals. Plain values written with
/// [`Store::set_ex`] expire on the wall clock and are swept on the same
/// interval.
///
/// # Example
///
/// ```
/// use turnstile::{MemoryStore, RateLimiter};
/// use std::time::Duration;
///
/// let store = MemoryStore::builder()
///     .capacity(10_000)
///     .cleanup_interval(Duration::from_secs(120))
///     .build();
/// let limiter = RateLimiter::new(store);
/// ```
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    buckets: HashMap<String, (BucketState, f64)>,
    values: HashMap<String, (String, SystemTime)>,
    scripts: HashSet<ScriptRef>,
    // Latest timestamp seen by run_script, used to judge expiry on reads
    latest: f64,
    next_cleanup: f64,
    next_value_cleanup: SystemTime,
    cleanup_interval: f64,
}

/// Builder for configuring a MemoryStore
pub struct MemoryStoreBuilder {
    capacity: usize,
    cleanup_interval: Duration,
}

impl MemoryStore {
    /// Create a store with default capacity and a 60 second sweep interval
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder {
            capacity: DEFAULT_CAPACITY,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }

    fn with_config(capacity: usize, cleanup_interval: Duration) -> Self {
        MemoryStore {
            inner: Mutex::new(Inner {
                // Pre-allocate with overhead to avoid rehashing
                buckets: HashMap::with_capacity(
                    (capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize,
                ),
                values: HashMap::new(),
                scripts: HashSet::new(),
                latest: 0.0,
                next_cleanup: 0.0,
                next_value_cleanup: SystemTime::UNIX_EPOCH,
                cleanup_interval: cleanup_interval.as_secs_f64(),
            }),
        }
    }

    /// Number of buckets currently held, expired or not
    pub fn len(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().buckets.is_empty()
    }

    /// Number of plain values currently held, expired or not
    pub fn value_count(&self) -> usize {
        self.inner.lock().values.len()
    }

    /// Forget all registered scripts, like `SCRIPT FLUSH` or a Redis restart
    pub fn flush_scripts(&self) {
        self.inner.lock().scripts.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreBuilder {
    /// Expected number of distinct keys
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// How often expired buckets are swept from memory
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn build(self) -> MemoryStore {
        MemoryStore::with_config(self.capacity, self.cleanup_interval)
    }
}

impl Inner {
    fn maybe_clean_expired(&mut self, now: f64) {
        if now >= self.next_cleanup {
            let before = self.buckets.len();
            self.buckets.retain(|_, (_, expires_at)| *expires_at > now);
            let evicted = before.saturating_sub(self.buckets.len());
            if evicted > 0 {
                tracing::debug!(evicted, "Swept expired buckets");
            }
            self.next_cleanup = now + self.cleanup_interval;
        }
    }

    fn maybe_clean_values(&mut self, now: SystemTime) {
        if now >= self.next_value_cleanup {
            let before = self.values.len();
            self.values.retain(|_, (_, expires_at)| *expires_at > now);
            let evicted = before.saturating_sub(self.values.len());
            if evicted > 0 {
                tracing::debug!(evicted, "Swept expired values");
            }
            self.next_value_cleanup = now + Duration::from_secs_f64(self.cleanup_interval);
        }
    }

    fn live_bucket(&self, key: &str, now: f64) -> Option<BucketState> {
        match self.buckets.get(key) {
            Some((state, expires_at)) if *expires_at > now => Some(*state),
            _ => None,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn register_script(&self) -> Result<ScriptRef, StoreError> {
        let script = ScriptRef::token_bucket();
        self.inner.lock().scripts.insert(script.clone());
        Ok(script)
    }

    async fn run_script(
        &self,
        script: &ScriptRef,
        key: &str,
        bucket: TokenBucket,
        now: f64,
        requested: u32,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.scripts.contains(script) {
            return Err(StoreError::NoScript);
        }

        inner.latest = inner.latest.max(now);
        inner.maybe_clean_expired(now);
        inner.maybe_clean_values(SystemTime::now());

        let evaluation = bucket.evaluate(inner.live_bucket(key, now), now, requested);
        let expires_at = now + bucket.expiry_secs() as f64;
        inner
            .buckets
            .insert(key.to_string(), (evaluation.state, expires_at));

        Ok(evaluation.allowed)
    }

    async fn inspect(&self, key: &str) -> Result<Option<BucketState>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.live_bucket(key, inner.latest))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        let now = SystemTime::now();
        inner.maybe_clean_values(now);
        let expired = match inner.values.get(key) {
            Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.values.remove(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        inner.maybe_clean_values(now);
        inner
            .values
            .insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }
}

