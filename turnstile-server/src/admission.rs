//! Shared admission service
//!
//! One [`AdmissionService`] is built at startup from the configured policies
//! and cloned into every transport. It owns one [`AdmissionGuard`] per
//! purpose, all of them sharing a single [`RateLimiter`] and therefore a
//! single cached script reference and store connection.
//!
//! ```text
//!   POST /admit/{purpose} ──► AdmissionService ──► AdmissionGuard (per purpose)
//!                                                        │
//!                                                  RateLimiter ──► Store
//! ```

use crate::config::{IdentityKind, PolicyConfig};
use crate::metrics::Metrics;
use crate::store::SharedStore;
use crate::types::PolicyView;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use turnstile::{
    AddrOnly, AdmissionGuard, BucketState, LimiterError, PrincipalOnly, RateLimiter, Rejected,
    RequestContext, Verdict, rate_limit_key,
};

/// Why a request was not admitted
#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error("Unknown purpose: {0}")]
    UnknownPurpose(String),
    #[error("requested must be at least 1")]
    ZeroRequested,
    #[error(transparent)]
    Rejected(#[from] Rejected),
    #[error(transparent)]
    Store(#[from] LimiterError),
}

/// A request that may proceed
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    /// Bucket the request was charged to
    pub key: String,
    /// [`Verdict::Allowed`] or [`Verdict::FailedOpen`]
    pub verdict: Verdict,
}

struct PolicyEntry {
    guard: AdmissionGuard<SharedStore>,
    identity: IdentityKind,
}

/// Handle to the configured policies, cheap to clone
#[derive(Clone)]
pub struct AdmissionService {
    limiter: Arc<RateLimiter<SharedStore>>,
    policies: Arc<HashMap<String, PolicyEntry>>,
    metrics: Arc<Metrics>,
}

impl AdmissionService {
    /// Build one guard per configured policy over `store`
    ///
    /// # Errors
    ///
    /// Returns an error if a policy is invalid.
    pub fn new(store: SharedStore, policies: &[PolicyConfig], metrics: Arc<Metrics>) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(store));

        let mut entries = HashMap::with_capacity(policies.len());
        for config in policies {
            let policy = config
                .rate_policy()
                .with_context(|| format!("Invalid policy for purpose '{}'", config.purpose))?;
            let guard = AdmissionGuard::new(policy, Arc::clone(&limiter));
            let guard = match config.identity {
                IdentityKind::PrincipalOrAddr => guard,
                IdentityKind::Addr => guard.with_identity(AddrOnly),
                IdentityKind::Principal => guard.with_identity(PrincipalOnly),
            };

            entries.insert(
                config.purpose.clone(),
                PolicyEntry {
                    guard,
                    identity: config.identity,
                },
            );
        }

        Ok(Self {
            limiter,
            policies: Arc::new(entries),
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Charge `requested` tokens to the caller's bucket for `purpose`
    ///
    /// # Errors
    ///
    /// - [`AdmitError::UnknownPurpose`] if no policy protects `purpose`
    /// - [`AdmitError::ZeroRequested`] if `requested` is zero
    /// - [`AdmitError::Rejected`] if the bucket is empty
    ///
    /// Store failures are admitted with [`Verdict::FailedOpen`].
    pub async fn admit(
        &self,
        purpose: &str,
        ctx: &RequestContext,
        requested: u32,
    ) -> Result<Admitted, AdmitError> {
        let start = Instant::now();

        let Some(entry) = self.policies.get(purpose) else {
            self.metrics.record_invalid(elapsed_micros(start));
            return Err(AdmitError::UnknownPurpose(purpose.to_string()));
        };
        if requested == 0 {
            self.metrics.record_invalid(elapsed_micros(start));
            return Err(AdmitError::ZeroRequested);
        }

        match entry.guard.charge(ctx, requested).await {
            Ok(admission) => {
                self.metrics
                    .record_admission(purpose, elapsed_micros(start), admission.verdict);
                Ok(Admitted {
                    key: admission.key,
                    verdict: admission.verdict,
                })
            }
            Err(rejected) => {
                self.metrics
                    .record_admission(purpose, elapsed_micros(start), Verdict::Denied);
                Err(rejected.into())
            }
        }
    }

    /// Stored state of `identity`'s bucket for `purpose`
    ///
    /// # Errors
    ///
    /// [`AdmitError::UnknownPurpose`] if no policy protects `purpose`, and
    /// [`AdmitError::Store`] if the store cannot be read. Inspection does
    /// not fail open.
    pub async fn bucket(
        &self,
        purpose: &str,
        identity: &str,
    ) -> Result<Option<BucketState>, AdmitError> {
        if !self.policies.contains_key(purpose) {
            return Err(AdmitError::UnknownPurpose(purpose.to_string()));
        }

        Ok(self
            .limiter
            .inspect(&rate_limit_key(purpose, identity))
            .await?)
    }

    /// Configured policies, ordered by purpose
    pub fn policies(&self) -> Vec<PolicyView> {
        let mut views: Vec<_> = self
            .policies
            .values()
            .map(|entry| {
                let policy = entry.guard.policy();
                PolicyView {
                    purpose: policy.purpose().to_string(),
                    limit_per_minute: policy.limit_per_minute(),
                    burst: policy.burst(),
                    identity: entry.identity,
                }
            })
            .collect();
        views.sort_by(|a, b| a.purpose.cmp(&b.purpose));
        views
    }
}

fn elapsed_micros(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}
