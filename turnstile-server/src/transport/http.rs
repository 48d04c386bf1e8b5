//! HTTP/JSON transport
//!
//! # API Endpoints
//!
//! ## POST /admit/{purpose}
//!
//! Charge the caller's bucket for `purpose` before doing the protected work.
//!
//! ### Request Body
//!
//! ```json
//! {
//!   "principal": "alice",
//!   "addr": "198.51.100.4",
//!   "requested": 1
//! }
//! ```
//!
//! - Every field is optional and an empty body is accepted
//! - `addr` defaults to the TCP peer address
//! - `requested` defaults to 1
//!
//! ### Responses
//!
//! - `200` `{"allowed": true, "key": "rl:auth:login:alice", "failed_open": false}`
//! - `429` `{"error": "Too many requests"}`
//! - `404` for a purpose without a policy, `400` for a malformed body
//!
//! ## GET /buckets/{purpose}/{identity}
//!
//! Stored state of one bucket, without refilling or consuming. `404` if the
//! bucket does not exist (never used or expired), `503` if the store cannot
//! be read. Admission never answers `503`: it fails open instead.
//!
//! ## GET /policies
//!
//! Configured policies.
//!
//! ## GET /metrics
//!
//! Prometheus text format.
//!
//! ## GET /health
//!
//! Health check endpoint. Returns "OK" with 200 status.

use super::Transport;
use crate::admission::{AdmissionService, AdmitError};
use crate::types::{AdmitRequest, AdmitResponse, BucketResponse, HttpErrorResponse, PolicyView};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use std::net::SocketAddr;
use turnstile::{RequestContext, rate_limit_key};

type HttpError = (StatusCode, Json<HttpErrorResponse>);

/// HTTP transport implementation
pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid HTTP address {host}:{port}"))?;
        Ok(Self { addr })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, service: AdmissionService) -> Result<()> {
        let app = router(service);

        tracing::info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

/// Routes of the HTTP API
pub fn router(service: AdmissionService) -> Router {
    Router::new()
        .route("/admit/{purpose}", post(handle_admit))
        .route("/buckets/{purpose}/{identity}", get(handle_bucket))
        .route("/policies", get(handle_policies))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(|| async { "OK" }))
        .with_state(service)
}

fn error(status: StatusCode, message: impl Into<String>) -> HttpError {
    (status, Json(HttpErrorResponse::new(message)))
}

fn admit_error(e: AdmitError) -> HttpError {
    match e {
        AdmitError::UnknownPurpose(_) => error(StatusCode::NOT_FOUND, e.to_string()),
        AdmitError::ZeroRequested => error(StatusCode::BAD_REQUEST, e.to_string()),
        AdmitError::Rejected(rejected) => {
            tracing::debug!(key = %rejected.key, "Admission rejected");
            error(StatusCode::TOO_MANY_REQUESTS, rejected.to_string())
        }
        AdmitError::Store(e) => {
            tracing::warn!(error = %e, "Bucket store unavailable");
            error(StatusCode::SERVICE_UNAVAILABLE, "Bucket store unavailable")
        }
    }
}

async fn handle_admit(
    State(service): State<AdmissionService>,
    Path(purpose): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<Json<AdmitResponse>, HttpError> {
    let req: AdmitRequest = if body.is_empty() {
        AdmitRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            service.metrics().record_invalid(0);
            error(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}"))
        })?
    };

    let mut ctx = RequestContext::new().with_addr(req.addr.unwrap_or_else(|| peer.ip()));
    if let Some(principal) = req.principal.filter(|p| !p.is_empty()) {
        ctx = ctx.with_principal(principal);
    }

    let admitted = service
        .admit(&purpose, &ctx, req.requested.unwrap_or(1))
        .await
        .map_err(admit_error)?;

    Ok(Json(AdmitResponse::new(admitted.key, admitted.verdict)))
}

async fn handle_bucket(
    State(service): State<AdmissionService>,
    Path((purpose, identity)): Path<(String, String)>,
) -> Result<Json<BucketResponse>, HttpError> {
    let key = rate_limit_key(&purpose, &identity);

    match service.bucket(&purpose, &identity).await {
        Ok(Some(state)) => Ok(Json(BucketResponse::new(key, state))),
        Ok(None) => Err(error(StatusCode::NOT_FOUND, format!("No bucket for {key}"))),
        Err(e) => Err(admit_error(e)),
    }
}

async fn handle_policies(State(service): State<AdmissionService>) -> Json<Vec<PolicyView>> {
    Json(service.policies())
}

async fn handle_metrics(State(service): State<AdmissionService>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.metrics().export_prometheus(),
    )
}
