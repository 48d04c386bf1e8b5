//! # Turnstile
//!
//! Shared token-bucket admission control for services running as many
//! independent processes.
//!
//! ## Overview
//!
//! Turnstile keeps one token bucket per `(purpose, identity)` pair in a
//! shared store and updates it atomically on every protected request:
//! - **Cross-process**: bucket state lives only in the store (Redis), so every
//!   server instance sees the same buckets
//! - **Race-free**: the refill-and-consume step runs as a single Lua script,
//!   never as separate reads and writes
//! - **Fail-open**: if the store is down or slow, requests are allowed; a
//!   limiter outage never turns into a service outage
//! - **Cheap**: one store round-trip per check, bounded by a timeout
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnstile::{AdmissionGuard, RateLimiter, RatePolicy, RedisStore, RequestContext};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisStore::open("redis://127.0.0.1:6379/0")?;
//! let limiter = Arc::new(RateLimiter::new(store));
//!
//! // Login attempts: 5 per minute per caller, bursts of up to 5
//! let login = AdmissionGuard::new(RatePolicy::per_minute("auth:login", 5, 5)?, limiter);
//!
//! let ctx = RequestContext::new().with_addr("198.51.100.4".parse()?);
//! match login.admit(&ctx).await {
//!     Ok(_) => println!("proceed"),
//!     Err(rejected) => println!("429: {rejected}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Building Blocks
//!
//! - [`TokenBucket`]: the pure refill/consume arithmetic
//! - [`Store`]: the atomic update contract, implemented by [`RedisStore`] and
//!   [`MemoryStore`]
//! - [`RateLimiter`]: registers the script once, runs checks, fails open
//! - [`AdmissionGuard`]: one per protected operation; derives the caller's
//!   identity through an [`IdentityStrategy`] and rejects with [`Rejected`]
//! - [`JsonCache`]: fail-soft JSON values in the same store
//!
//! ## Bucket Parameters
//!
//! - **`rate`**: tokens added per second (`limit_per_minute / 60`)
//! - **`capacity`**: maximum tokens, i.e. the largest burst
//! - **`requested`**: tokens consumed by one check (default: 1)
//!
//! ## Thread Safety
//!
//! [`RateLimiter`] holds no per-request state and needs no lock; share it
//! with an [`Arc`](std::sync::Arc). Consistency between concurrent checks on
//! the same key is guaranteed by the store.
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for the in-memory store's maps

pub mod core;

pub use core::{
    AddrOnly, Admission, AdmissionGuard, BucketState, Evaluation, IdentityStrategy, JsonCache, LimiterError,
    MemoryStore, MemoryStoreBuilder, PolicyError, PrincipalOnly, PrincipalOrAddr, RateLimiter,
    RatePolicy, RedisStore, Rejected, RequestContext, ScriptRef, Store, StoreError, TokenBucket,
    Verdict,
};

pub use crate::core::guard::rate_limit_key;
