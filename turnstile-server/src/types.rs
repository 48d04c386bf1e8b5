//! Request and response bodies of the HTTP API
//!
//! # Example
//!
//! ```json
//! POST /admit/auth:login
//! {"principal": "alice", "requested": 1}
//!
//! 200 OK
//! {"allowed": true, "key": "rl:auth:login:alice", "failed_open": false}
//! ```

use crate::config::IdentityKind;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use turnstile::{BucketState, Verdict};

/// Body of `POST /admit/{purpose}`; every field is optional
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AdmitRequest {
    /// Authenticated principal of the caller
    #[serde(default)]
    pub principal: Option<String>,
    /// Caller's address (defaults to the TCP peer)
    #[serde(default)]
    pub addr: Option<IpAddr>,
    /// Tokens to consume (defaults to 1)
    #[serde(default)]
    pub requested: Option<u32>,
}

/// Successful admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitResponse {
    /// Always true; denials are answered with 429
    pub allowed: bool,
    /// Bucket the request was charged to
    pub key: String,
    /// The store could not be consulted and the request was let through
    pub failed_open: bool,
}

impl AdmitResponse {
    pub fn new(key: String, verdict: Verdict) -> Self {
        AdmitResponse {
            allowed: verdict.is_allowed(),
            key,
            failed_open: verdict == Verdict::FailedOpen,
        }
    }
}

/// Read-only view of a stored bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketResponse {
    pub key: String,
    pub tokens: f64,
    /// Unix time in seconds of the last update
    pub last_refill_at: f64,
}

impl BucketResponse {
    pub fn new(key: String, state: BucketState) -> Self {
        BucketResponse {
            key,
            tokens: state.tokens,
            last_refill_at: state.last_refill_at,
        }
    }
}

/// A configured policy as listed by `GET /policies`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyView {
    pub purpose: String,
    pub limit_per_minute: u32,
    pub burst: u32,
    pub identity: IdentityKind,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,
}

impl HttpErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        HttpErrorResponse {
            error: error.into(),
        }
    }
}
