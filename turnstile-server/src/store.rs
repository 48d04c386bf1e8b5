//! Store factory for the admission server
//!
//! This module creates the bucket store selected by configuration.
//!
//! ## Redis Store
//! - Buckets are shared by every server instance pointing at the same Redis
//! - Connects lazily: the server starts (and fails open) while Redis is down
//! - Best for: production, more than one instance
//!
//! ## Memory Store
//! - Buckets live in this process only
//! - Idle buckets are swept at the configured cleanup interval
//! - Best for: development and single-instance deployments

use crate::config::{StoreConfig, StoreType};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use turnstile::{MemoryStore, RedisStore, Store};

/// Store shared by all policies of a server
pub type SharedStore = Arc<dyn Store>;

/// Create the configured store
///
/// # Errors
///
/// Returns an error if the Redis URL cannot be parsed. Reachability is not
/// checked here.
pub fn create_store(config: &StoreConfig) -> Result<SharedStore> {
    match config.store_type {
        StoreType::Redis => {
            let store = RedisStore::open(&config.redis_url)
                .with_context(|| format!("Invalid Redis URL: {}", config.redis_url))?
                .with_timeout(config.timeout());
            Ok(Arc::new(store))
        }
        StoreType::Memory => {
            let store = MemoryStore::builder()
                .capacity(config.capacity)
                .cleanup_interval(Duration::from_secs(config.cleanup_interval))
                .build();
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_config(store_type: StoreType, redis_url: &str) -> StoreConfig {
        StoreConfig {
            store_type,
            redis_url: redis_url.to_string(),
            timeout_ms: 250,
            capacity: 1_000,
            cleanup_interval: 60,
        }
    }

    #[test]
    fn test_create_store() {
        assert!(create_store(&store_config(StoreType::Memory, "")).is_ok());
        assert!(create_store(&store_config(StoreType::Redis, "redis://127.0.0.1:6379/0")).is_ok());
        assert!(create_store(&store_config(StoreType::Redis, "not a url")).is_err());
    }
}
