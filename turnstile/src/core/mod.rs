//! Core components of the turnstile admission control library
//!
//! This module contains the fundamental building blocks:
//! - [`bucket`]: Token bucket arithmetic
//! - [`store`]: Shared state stores and the atomic update contract
//! - [`limiter`]: The fail-open rate limiter service
//! - [`policy`]: Validated per-operation rate limit policies
//! - [`guard`]: Per-operation admission decisions and identity strategies
//! - [`cache`]: Fail-soft JSON values sharing the limiter's store

pub mod bucket;
pub mod cache;
pub mod guard;
pub mod limiter;
pub mod policy;
pub mod store;
#[cfg(test)]
mod tests;

pub use bucket::{BucketState, Evaluation, TokenBucket};
pub use cache::JsonCache;
pub use guard::{
    AddrOnly, Admission, AdmissionGuard, IdentityStrategy, PrincipalOnly, PrincipalOrAddr, Rejected,
    RequestContext,
};
pub use limiter::{RateLimiter, Verdict};
pub use policy::RatePolicy;
pub use store::{MemoryStore, MemoryStoreBuilder, RedisStore, ScriptRef, Store};

use std::time::Duration;

/// Errors reported by a [`Store`]
///
/// The rate limiter never surfaces these to its callers; they are mapped to
/// the fail-open path.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer within the configured timeout
    #[error("store did not respond within {0:?}")]
    Timeout(Duration),
    /// The referenced script is not registered (e.g. after a store restart)
    #[error("script is not registered with the store")]
    NoScript,
    /// The store answered with something the limiter does not understand
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.kind() == redis::ErrorKind::NoScriptError {
            StoreError::NoScript
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

/// Invalid rate limit configuration
///
/// Returned when a [`RatePolicy`] is built, so configuration mistakes fail
/// at startup rather than on a request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("purpose must not be empty")]
    EmptyPurpose,
    #[error("limit per minute must be greater than zero")]
    ZeroLimit,
    #[error("burst must be at least 1")]
    ZeroBurst,
    #[error("rate must be a positive, finite number of tokens per second (got {0})")]
    InvalidRate(f64),
    #[error("requested tokens must be at least 1")]
    ZeroRequested,
    #[error("rate {rate} is too slow to refill a burst of {capacity}")]
    RateTooSlow { rate: f64, capacity: u32 },
}

/// Errors from the strict [`RateLimiter::check`] path
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid rate limit parameters: {0}")]
    InvalidPolicy(#[from] PolicyError),
}
