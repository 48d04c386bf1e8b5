//! Shared state stores
//!
//! A [`Store`] is the single source of truth for bucket state. Every bucket
//! update goes through [`Store::run_script`], which must read, compute and
//! write as one atomic step; nothing else in the crate writes bucket fields.
//!
//! - [`RedisStore`]: Redis, shared by any number of server processes
//! - [`MemoryStore`]: in-process, for single-instance deployments and tests

use super::StoreError;
use super::bucket::{BucketState, TokenBucket};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

mod memory;
mod redis;

pub use self::memory::{MemoryStore, MemoryStoreBuilder};
pub use self::redis::RedisStore;


/// Source of the atomic token bucket script
pub const TOKEN_BUCKET_LUA: &str = include_str!("token_bucket.lua");

/// Reference to a script registered with a store
///
/// For Redis this is the SHA1 digest returned by `SCRIPT LOAD`; it is cheap
/// to clone and is what every later invocation passes instead of the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptRef(String);

impl ScriptRef {
    pub fn new(digest: impl Into<String>) -> Self {
        ScriptRef(digest.into())
    }

    /// SHA1 digest of [`TOKEN_BUCKET_LUA`], as Redis computes it
    pub fn token_bucket() -> Self {
        ScriptRef(::redis::Script::new(TOKEN_BUCKET_LUA).get_hash().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Store contract consumed by the rate limiter
///
/// Implementations must be safe to share between tasks. Errors are plain
/// [`StoreError`]s; deciding what a failure means (fail-open) is up to the
/// caller.
#[async_trait]
pub trait Store: Send + Sync {
    /// Register the token bucket script and return a reference for
    /// [`run_script`](Store::run_script)
    async fn register_script(&self) -> Result<ScriptRef, StoreError>;

    /// Atomically evaluate `bucket` for `key` at `now`, consuming `requested`
    /// tokens when allowed
    ///
    /// Returns [`StoreError::NoScript`] when `script` is not known to the
    /// store, e.g. after a store restart flushed its script cache.
    async fn run_script(
        &self,
        script: &ScriptRef,
        key: &str,
        bucket: TokenBucket,
        now: f64,
        requested: u32,
    ) -> Result<bool, StoreError>;

    /// Read the stored state of `key` without modifying it
    async fn inspect(&self, key: &str) -> Result<Option<BucketState>, StoreError>;

    /// Get a plain value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a plain value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: Store + ?Sized> Store for Arc<T> {
    async fn register_script(&self) -> Result<ScriptRef, StoreError> {
        (**self).register_script().await
    }

    async fn run_script(
        &self,
        script: &ScriptRef,
        key: &str,
        bucket: TokenBucket,
        now: f64,
        requested: u32,
    ) -> Result<bool, StoreError> {
        (**self)
            .run_script(script, key, bucket, now, requested)
            .await
    }

    async fn inspect(&self, key: &str) -> Result<Option<BucketState>, StoreError> {
        (**self).inspect(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).set_ex(key, value, ttl).await
    }
}
