//! Redis-backed store for distributed multi-process coordination.
//!
//! Bucket updates run as a Lua script registered once with `SCRIPT LOAD` and
//! invoked by digest with `EVALSHA`, so concurrent callers in any number of
//! processes see a strictly serialized read-modify-write per key.

use super::{ScriptRef, Store, TOKEN_BUCKET_LUA};
use crate::core::StoreError;
use crate::core::bucket::{BucketState, TokenBucket};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Default bound on any single Redis round-trip, connection setup included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// Redis store.
///
/// The connection is opened on first use, not in the constructor, so a
/// server can start while Redis is down and begin limiting once it comes
/// back. Every call is bounded by the configured timeout; a call that runs
/// out of time reports [`StoreError::Timeout`].
pub struct RedisStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisStore {
    /// Create a store for `redis_url` (e.g. "redis://127.0.0.1:6379/0").
    ///
    /// Only the URL is validated here; no connection is made.
    pub fn open(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid Redis URL: {e}")))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Bound every Redis call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                tracing::debug!("Connecting to Redis");
                bounded(self.timeout, ConnectionManager::new(self.client.clone())).await
            })
            .await?;

        Ok(conn.clone())
    }
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn register_script(&self) -> Result<ScriptRef, StoreError> {
        let mut conn = self.connection().await?;

        let digest: String = bounded(
            self.timeout,
            redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(TOKEN_BUCKET_LUA)
                .query_async(&mut conn),
        )
        .await?;

        tracing::debug!(digest = %digest, "Registered token bucket script");
        Ok(ScriptRef::new(digest))
    }

    async fn run_script(
        &self,
        script: &ScriptRef,
        key: &str,
        bucket: TokenBucket,
        now: f64,
        requested: u32,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;

        let allowed: i64 = bounded(
            self.timeout,
            redis::cmd("EVALSHA")
                .arg(script.as_str())
                .arg(1)
                .arg(key)
                .arg(bucket.rate())
                .arg(bucket.capacity())
                .arg(now)
                .arg(requested)
                .query_async(&mut conn),
        )
        .await?;

        match allowed {
            1 => Ok(true),
            0 => Ok(false),
            other => Err(StoreError::Protocol(format!(
                "token bucket script returned {other}"
            ))),
        }
    }

    async fn inspect(&self, key: &str) -> Result<Option<BucketState>, StoreError> {
        let mut conn = self.connection().await?;

        let (tokens, last): (Option<f64>, Option<f64>) = bounded(
            self.timeout,
            redis::cmd("HMGET")
                .arg(key)
                .arg("tokens")
                .arg("last")
                .query_async(&mut conn),
        )
        .await?;

        Ok(match (tokens, last) {
            (Some(tokens), Some(last_refill_at)) => Some(BucketState {
                tokens,
                last_refill_at,
            }),
            _ => None,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        bounded(self.timeout, conn.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        // Redis rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        bounded(self.timeout, conn.set_ex::<_, _, ()>(key, value, seconds)).await
    }
}
