//! Admission decisions for protected operations
//!
//! An [`AdmissionGuard`] is configured once per protected operation with a
//! [`RatePolicy`] and an [`IdentityStrategy`]. For each request it derives
//! the caller's identity, builds the bucket key `rl:<purpose>:<identity>`
//! and asks the shared [`RateLimiter`] for a decision. A denial surfaces as
//! [`Rejected`], which the HTTP layer turns into `429 Too Many Requests`.

use super::limiter::{RateLimiter, Verdict};
use super::policy::RatePolicy;
use super::store::Store;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;


/// Prefix shared by every bucket key
pub const KEY_PREFIX: &str = "rl";

/// Identity used when neither a principal nor an address is known
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// What the request-handling layer knows about the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated principal (e.g. user id), if any
    pub principal: Option<String>,
    /// Network origin address
    pub addr: Option<IpAddr>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_addr(mut self, addr: IpAddr) -> Self {
        self.addr = Some(addr);
        self
    }
}

/// Derives the identity a bucket is keyed on
///
/// Returning `None` defers to the caller's network address. Any
/// `Fn(&RequestContext) -> Option<String>` closure is a strategy:
///
/// ```
/// use turnstile::{IdentityStrategy, RequestContext};
///
/// // Bucket per tenant, taken from a "tenant/user" principal
/// let by_tenant = |ctx: &RequestContext| {
///     ctx.principal
///         .as_deref()
///         .and_then(|p| p.split('/').next())
///         .map(str::to_string)
/// };
///
/// let ctx = RequestContext::new().with_principal("acme/alice");
/// assert_eq!(by_tenant.identify(&ctx).as_deref(), Some("acme"));
/// ```
pub trait IdentityStrategy: Send + Sync {
    fn identify(&self, ctx: &RequestContext) -> Option<String>;
}

impl<F> IdentityStrategy for F
where
    F: Fn(&RequestContext) -> Option<String> + Send + Sync,
{
    fn identify(&self, ctx: &RequestContext) -> Option<String> {
        self(ctx)
    }
}

/// Authenticated principal, else network address (the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalOrAddr;

impl IdentityStrategy for PrincipalOrAddr {
    fn identify(&self, ctx: &RequestContext) -> Option<String> {
        ctx.principal
            .clone()
            .or_else(|| ctx.addr.map(|addr| addr.to_string()))
    }
}

/// Network address only, even for authenticated callers
#[derive(Debug, Clone, Copy, Default)]
pub struct AddrOnly;

impl IdentityStrategy for AddrOnly {
    fn identify(&self, ctx: &RequestContext) -> Option<String> {
        ctx.addr.map(|addr| addr.to_string())
    }
}

/// Authenticated principal only; anonymous callers fall back to their address
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalOnly;

impl IdentityStrategy for PrincipalOnly {
    fn identify(&self, ctx: &RequestContext) -> Option<String> {
        ctx.principal.clone()
    }
}

/// Bucket key for `identity` under `purpose`
pub fn rate_limit_key(purpose: &str, identity: &str) -> String {
    format!("{KEY_PREFIX}:{purpose}:{identity}")
}

/// A request that may proceed, with the bucket it was charged to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub key: String,
    /// [`Verdict::Allowed`] or [`Verdict::FailedOpen`]
    pub verdict: Verdict,
}

/// A request was denied because its bucket is empty
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Too many requests")]
pub struct Rejected {
    /// Purpose of the policy that rejected the request
    pub purpose: String,
    /// Bucket key that ran out of tokens
    pub key: String,
}

/// Per-operation decision point
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use turnstile::{AdmissionGuard, MemoryStore, RateLimiter, RatePolicy, RequestContext};
///
/// # tokio_test::block_on(async {
/// let limiter = Arc::new(RateLimiter::new(MemoryStore::new()));
/// let login = AdmissionGuard::new(RatePolicy::per_minute("auth:login", 5, 1).unwrap(), limiter);
///
/// let ctx = RequestContext::new().with_addr("203.0.113.7".parse().unwrap());
/// assert!(login.admit(&ctx).await.is_ok());
///
/// let rejected = login.admit(&ctx).await.unwrap_err();
/// assert_eq!(rejected.key, "rl:auth:login:203.0.113.7");
/// # });
/// ```
pub struct AdmissionGuard<S: Store> {
    policy: RatePolicy,
    limiter: Arc<RateLimiter<S>>,
    identity: Arc<dyn IdentityStrategy>,
}

impl<S: Store> AdmissionGuard<S> {
    /// Guard `policy` using [`PrincipalOrAddr`] identities
    pub fn new(policy: RatePolicy, limiter: Arc<RateLimiter<S>>) -> Self {
        AdmissionGuard {
            policy,
            limiter,
            identity: Arc::new(PrincipalOrAddr),
        }
    }

    /// Replace the identity strategy
    pub fn with_identity(mut self, strategy: impl IdentityStrategy + 'static) -> Self {
        self.identity = Arc::new(strategy);
        self
    }

    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }

    /// Identity for `ctx`: the strategy's answer, else the network address,
    /// else [`UNKNOWN_IDENTITY`]
    pub fn identity_of(&self, ctx: &RequestContext) -> String {
        self.identity
            .identify(ctx)
            .filter(|identity| !identity.is_empty())
            .or_else(|| ctx.addr.map(|addr| addr.to_string()))
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
    }

    pub fn key_for(&self, ctx: &RequestContext) -> String {
        rate_limit_key(self.policy.purpose(), &self.identity_of(ctx))
    }

    /// Admit one unit of work for the caller in `ctx`
    ///
    /// # Errors
    ///
    /// [`Rejected`] when the caller's bucket is empty. Store failures are not
    /// errors: they are admitted as [`Verdict::FailedOpen`].
    pub async fn admit(&self, ctx: &RequestContext) -> Result<Verdict, Rejected> {
        self.admit_n(ctx, 1).await
    }

    /// Admit work costing `requested` tokens
    pub async fn admit_n(&self, ctx: &RequestContext, requested: u32) -> Result<Verdict, Rejected> {
        self.admit_at(ctx, requested, SystemTime::now()).await
    }

    /// Like [`admit_n`](Self::admit_n) with an explicit clock reading
    pub async fn admit_at(
        &self,
        ctx: &RequestContext,
        requested: u32,
        now: SystemTime,
    ) -> Result<Verdict, Rejected> {
        self.charge_at(ctx, requested, now)
            .await
            .map(|admission| admission.verdict)
    }

    /// Like [`admit_n`](Self::admit_n), also reporting the charged key
    ///
    /// The identity strategy runs exactly once, so the key in the
    /// [`Admission`] or [`Rejected`] is the bucket that was charged.
    pub async fn charge(&self, ctx: &RequestContext, requested: u32) -> Result<Admission, Rejected> {
        self.charge_at(ctx, requested, SystemTime::now()).await
    }

    /// Like [`charge`](Self::charge) with an explicit clock reading
    pub async fn charge_at(
        &self,
        ctx: &RequestContext,
        requested: u32,
        now: SystemTime,
    ) -> Result<Admission, Rejected> {
        let key = self.key_for(ctx);
        let verdict = self
            .limiter
            .verdict(&key, self.policy.bucket(), requested, now)
            .await;

        match verdict {
            Verdict::Denied => Err(Rejected {
                purpose: self.policy.purpose().to_string(),
                key,
            }),
            verdict => Ok(Admission { key, verdict }),
        }
    }
}

impl<S: Store> Clone for AdmissionGuard<S> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            limiter: Arc::clone(&self.limiter),
            identity: Arc::clone(&self.identity),
        }
    }
}

impl<S: Store> fmt::Debug for AdmissionGuard<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
