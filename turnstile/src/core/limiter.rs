//! Fail-open rate limiter service
//!
//! [`RateLimiter`] wraps a [`Store`] and turns every bucket check into a
//! single atomic script invocation. It keeps no bucket state of its own; the
//! only thing cached locally is the reference to the registered script, so
//! one instance can be shared by every request handler in a process and any
//! number of processes can share the same store.
//!
//! # Failure policy
//!
//! A limiter outage must never become an outage of the service it protects.
//! When the store is unreachable, times out, fails to register the script or
//! returns an error, the request is **allowed** and a warning is logged.

use super::bucket::{BucketState, TokenBucket};
use super::policy;
use super::store::{ScriptRef, Store};
use super::{LimiterError, StoreError};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Enough tokens were available and have been consumed
    Allowed,
    /// Not enough tokens; the request should be rejected
    Denied,
    /// The store could not be consulted; the request is let through
    FailedOpen,
}

impl Verdict {
    /// Whether the protected operation may proceed
    pub fn is_allowed(self) -> bool {
        !matches!(self, Verdict::Denied)
    }
}

/// Token bucket rate limiter backed by a shared [`Store`]
///
/// # Example
///
/// ```
/// use turnstile::{MemoryStore, RateLimiter};
///
/// # tokio_test::block_on(async {
/// let limiter = RateLimiter::new(MemoryStore::new());
///
/// // 10 per minute, burst of 2
/// let rate = 10.0 / 60.0;
/// assert!(limiter.allow("rl:search:10.0.0.1", rate, 2).await);
/// assert!(limiter.allow("rl:search:10.0.0.1", rate, 2).await);
/// assert!(!limiter.allow("rl:search:10.0.0.1", rate, 2).await);
/// # });
/// ```
pub struct RateLimiter<S: Store> {
    store: S,
    script: ArcSwapOption<ScriptRef>,
}

impl<S: Store> RateLimiter<S> {
    /// Create a limiter over `store`
    ///
    /// Nothing is sent to the store until the first check.
    pub fn new(store: S) -> Self {
        RateLimiter {
            store,
            script: ArcSwapOption::empty(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Try to take one token from `key`
    ///
    /// `rate` is in tokens per second and `capacity` is the bucket size.
    /// Returns `false` only when the bucket is empty; store failures return
    /// `true`.
    pub async fn allow(&self, key: &str, rate: f64, capacity: u32) -> bool {
        self.allow_n(key, rate, capacity, 1).await
    }

    /// Try to take `requested` tokens from `key`
    pub async fn allow_n(&self, key: &str, rate: f64, capacity: u32, requested: u32) -> bool {
        self.allow_at(key, rate, capacity, requested, SystemTime::now())
            .await
    }

    /// Like [`allow_n`](Self::allow_n) with an explicit clock reading
    pub async fn allow_at(
        &self,
        key: &str,
        rate: f64,
        capacity: u32,
        requested: u32,
        now: SystemTime,
    ) -> bool {
        self.verdict(key, TokenBucket::new(rate, capacity), requested, now)
            .await
            .is_allowed()
    }

    /// Check `key` and report how the decision was reached
    ///
    /// This is the fail-open path: every error is logged and reported as
    /// [`Verdict::FailedOpen`].
    pub async fn verdict(
        &self,
        key: &str,
        bucket: TokenBucket,
        requested: u32,
        now: SystemTime,
    ) -> Verdict {
        match self.check(key, bucket, requested, now).await {
            Ok(true) => Verdict::Allowed,
            Ok(false) => {
                tracing::debug!(key, "Rate limit exceeded");
                Verdict::Denied
            }
            Err(LimiterError::InvalidPolicy(e)) => {
                tracing::error!(key, error = %e, "Invalid rate limit parameters, failing open");
                Verdict::FailedOpen
            }
            Err(LimiterError::Store(e)) => {
                tracing::warn!(key, error = %e, "Rate limit store failure, failing open");
                Verdict::FailedOpen
            }
        }
    }

    /// Check `key` without the fail-open policy
    ///
    /// Returns whether the request is allowed, or the error that prevented a
    /// decision. No error is retried: a failed call costs one round-trip at
    /// most (two on the first call, which registers the script).
    ///
    /// # Errors
    ///
    /// - [`LimiterError::InvalidPolicy`] for a non-positive rate, zero
    ///   capacity or zero requested tokens
    /// - [`LimiterError::Store`] when the store fails
    pub async fn check(
        &self,
        key: &str,
        bucket: TokenBucket,
        requested: u32,
        now: SystemTime,
    ) -> Result<bool, LimiterError> {
        policy::validate(bucket.rate(), bucket.capacity(), requested)?;

        let script = self.script().await?;
        let result = self
            .store
            .run_script(&script, key, bucket, unix_seconds(now), requested)
            .await;

        if let Err(StoreError::NoScript) = result {
            // Re-register on the next call, not this one
            self.script.store(None);
        }

        Ok(result?)
    }

    /// Read the stored state of `key`, without refilling or consuming
    pub async fn inspect(&self, key: &str) -> Result<Option<BucketState>, LimiterError> {
        Ok(self.store.inspect(key).await?)
    }

    async fn script(&self) -> Result<Arc<ScriptRef>, StoreError> {
        if let Some(script) = self.script.load_full() {
            return Ok(script);
        }

        let script = Arc::new(self.store.register_script().await?);
        self.script.store(Some(Arc::clone(&script)));
        Ok(script)
    }
}

/// Seconds since the Unix epoch; clocks set before the epoch read as zero
fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
