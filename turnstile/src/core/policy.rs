//! Per-operation rate limit policies
//!
//! A [`RatePolicy`] is the configuration for one protected operation: a
//! purpose (which namespaces its buckets), a sustained limit per minute and a
//! burst size. Policies are validated when built, never per request.

use super::PolicyError;
use super::bucket::{MAX_EXPIRY_SECS, TokenBucket};
use serde::Serialize;

/// Rate limit policy for one protected operation
///
/// # Example
///
/// ```
/// use turnstile::RatePolicy;
///
/// // Login attempts: 5 per minute, up to 5 at once
/// let login = RatePolicy::per_minute("auth:login", 5, 5).unwrap();
/// assert_eq!(login.capacity(), 5);
/// assert!((login.rate_per_second() - 5.0 / 60.0).abs() < f64::EPSILON);
///
/// // Zero limits are configuration errors
/// assert!(RatePolicy::per_minute("search", 0, 1).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatePolicy {
    purpose: String,
    limit_per_minute: u32,
    burst: u32,
}

impl RatePolicy {
    /// Build a policy allowing `limit_per_minute` sustained requests with
    /// bursts of up to `burst`
    ///
    /// # Errors
    ///
    /// - [`PolicyError::EmptyPurpose`] if `purpose` is empty
    /// - [`PolicyError::ZeroLimit`] if `limit_per_minute` is zero
    /// - [`PolicyError::ZeroBurst`] if `burst` is zero
    pub fn per_minute(
        purpose: impl Into<String>,
        limit_per_minute: u32,
        burst: u32,
    ) -> Result<Self, PolicyError> {
        let purpose = purpose.into();
        if purpose.is_empty() {
            return Err(PolicyError::EmptyPurpose);
        }
        if limit_per_minute == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        if burst == 0 {
            return Err(PolicyError::ZeroBurst);
        }

        Ok(RatePolicy {
            purpose,
            limit_per_minute,
            burst,
        })
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn limit_per_minute(&self) -> u32 {
        self.limit_per_minute
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Refill rate in tokens per second
    pub fn rate_per_second(&self) -> f64 {
        self.limit_per_minute as f64 / 60.0
    }

    /// Bucket capacity, i.e. the burst size
    pub fn capacity(&self) -> u32 {
        self.burst
    }

    pub fn bucket(&self) -> TokenBucket {
        TokenBucket::new(self.rate_per_second(), self.capacity())
    }
}

/// Check raw limiter arguments
pub(crate) fn validate(rate: f64, capacity: u32, requested: u32) -> Result<(), PolicyError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(PolicyError::InvalidRate(rate));
    }
    if capacity == 0 {
        return Err(PolicyError::ZeroBurst);
    }
    let expiry = capacity as f64 / rate * 2.0;
    if !expiry.is_finite() || expiry > MAX_EXPIRY_SECS {
        return Err(PolicyError::RateTooSlow { rate, capacity });
    }
    if requested == 0 {
        return Err(PolicyError::ZeroRequested);
    }
    Ok(())
}
