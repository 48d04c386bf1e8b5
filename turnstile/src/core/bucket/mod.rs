//! Token bucket arithmetic
//!
//! This module holds the pure refill/consume computation shared by every
//! store. It never touches a store itself: the [`Store`](crate::Store)
//! implementations run [`TokenBucket::evaluate`] (or its Lua twin in
//! `token_bucket.lua`) as one atomic step against their own state.
//!
//! A bucket holds up to `capacity` tokens and refills continuously at `rate`
//! tokens per second. A request for `n` tokens is allowed when at least `n`
//! tokens are available after refilling.


/// Idle buckets live at least this long in the store (seconds)
pub const MIN_EXPIRY_SECS: f64 = 60.0;

/// Longest idle expiry a bucket may ask for (seconds); must stay a plain
/// integer when formatted by the store's script
pub const MAX_EXPIRY_SECS: f64 = 1e12;

/// Persisted state of a single bucket
///
/// Stored as a hash with the fields `tokens` and `last` so that the Lua
/// script and the in-memory store agree on the layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens currently available, always within `[0, capacity]`
    pub tokens: f64,
    /// Unix time in seconds of the last update to this bucket
    pub last_refill_at: f64,
}

impl BucketState {
    /// State of a bucket that has never been seen: full, refilled at the epoch
    pub fn full(capacity: u32) -> Self {
        BucketState {
            tokens: capacity as f64,
            last_refill_at: 0.0,
        }
    }
}

/// Outcome of one evaluation: the decision and the state to write back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub allowed: bool,
    pub state: BucketState,
}

/// Refill rate and capacity of a bucket
///
/// # Example
///
/// ```
/// use turnstile::TokenBucket;
///
/// // 5 per minute, burst of 5
/// let bucket = TokenBucket::new(5.0 / 60.0, 5);
/// let first = bucket.evaluate(None, 0.0, 1);
/// assert!(first.allowed);
/// assert_eq!(first.state.tokens, 4.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    rate: f64,
    capacity: u32,
}

impl TokenBucket {
    /// Create a bucket refilling at `rate` tokens per second, holding at most
    /// `capacity` tokens
    ///
    /// Parameters are not validated here; [`RatePolicy`](crate::RatePolicy)
    /// and [`RateLimiter::check`](crate::RateLimiter::check) reject
    /// non-positive values before a bucket is ever evaluated.
    pub fn new(rate: f64, capacity: u32) -> Self {
        TokenBucket { rate, capacity }
    }

    /// Tokens added per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum number of tokens (burst size)
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Refill the bucket up to `now`, then try to take `requested` tokens
    ///
    /// A missing `state` is treated as a full bucket. Time going backwards
    /// counts as zero elapsed time. The returned state carries `now` as its
    /// refill timestamp and must be written back whether or not the request
    /// was allowed, so refill progress is never lost on denial.
    pub fn evaluate(&self, state: Option<BucketState>, now: f64, requested: u32) -> Evaluation {
        let capacity = self.capacity as f64;
        let before = state.unwrap_or_else(|| BucketState::full(self.capacity));

        let elapsed = (now - before.last_refill_at).max(0.0);
        let refilled = (before.tokens.max(0.0) + elapsed * self.rate).min(capacity);

        let requested = requested as f64;
        let allowed = refilled >= requested;
        let tokens = if allowed {
            refilled - requested
        } else {
            refilled
        };

        Evaluation {
            allowed,
            state: BucketState {
                tokens,
                last_refill_at: now,
            },
        }
    }

    /// Seconds an idle bucket is kept: twice a full drain-to-refill cycle,
    /// never less than [`MIN_EXPIRY_SECS`]
    pub fn expiry_secs(&self) -> u64 {
        (self.capacity as f64 / self.rate * 2.0)
            .max(MIN_EXPIRY_SECS)
            .ceil() as u64
    }
}
