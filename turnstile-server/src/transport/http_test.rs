#[cfg(test)]
mod tests {
    use super::super::http::router;
    use crate::admission::AdmissionService;
    use crate::config::{IdentityKind, PolicyConfig};
    use crate::metrics::Metrics;
    use crate::types::{AdmitResponse, BucketResponse, HttpErrorResponse, PolicyView};
    use axum::Router;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use turnstile::{MemoryStore, RedisStore};

    const PEER: ([u8; 4], u16) = ([203, 0, 113, 9], 40000);

    fn policies() -> Vec<PolicyConfig> {
        vec![
            PolicyConfig {
                purpose: "auth:login".to_string(),
                limit_per_minute: 5,
                burst: 5,
                identity: IdentityKind::PrincipalOrAddr,
            },
            PolicyConfig {
                purpose: "export".to_string(),
                limit_per_minute: 2,
                burst: 1,
                identity: IdentityKind::Principal,
            },
        ]
    }

    fn app_with(store: crate::store::SharedStore) -> Router {
        let policies = policies();
        let metrics = Arc::new(Metrics::new(policies.iter().map(|p| p.purpose.clone())));
        let service = AdmissionService::new(store, &policies, metrics).unwrap();
        router(service).layer(MockConnectInfo(SocketAddr::from(PEER)))
    }

    fn app() -> Router {
        app_with(Arc::new(MemoryStore::new()))
    }

    fn admit(purpose: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/admit/{purpose}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_admit_uses_peer_address() {
        let response = app().oneshot(admit("auth:login", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: AdmitResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(body.allowed);
        assert!(!body.failed_open);
        assert_eq!(body.key, "rl:auth:login:203.0.113.9");
    }

    #[tokio::test]
    async fn test_admit_rejects_with_429() {
        let app = app();
        let request = r#"{"principal": "alice"}"#;

        for _ in 0..5 {
            let response = app.clone().oneshot(admit("auth:login", request)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(admit("auth:login", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: HttpErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.error, "Too many requests");

        // Another caller still has a full bucket
        let response = app
            .oneshot(admit("auth:login", r#"{"addr": "198.51.100.4"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admit_errors() {
        let app = app();

        let response = app.clone().oneshot(admit("unknown", "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(admit("auth:login", r#"{"requested": 0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(admit("auth:login", r#"{"addr": "not an address"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(admit("auth:login", "not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admit_fails_open_when_store_is_down() {
        let store = RedisStore::open("redis://127.0.0.1:1/")
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let app = app_with(Arc::new(store));

        // Well past the burst of 1: every request is let through
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(admit("export", r#"{"principal": "bob"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body: AdmitResponse =
                serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert!(body.allowed);
            assert!(body.failed_open);
        }

        // Inspection does not fail open
        let response = app.oneshot(get("/buckets/export/bob")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_bucket_endpoint() {
        let app = app();

        let response = app.clone().oneshot(get("/buckets/export/bob")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(admit("export", r#"{"principal": "bob"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get("/buckets/export/bob")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: BucketResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.key, "rl:export:bob");
        assert!(body.tokens < 1.0);
        assert!(body.last_refill_at > 0.0);

        let response = app.oneshot(get("/buckets/unknown/bob")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_policies_health_and_metrics() {
        let app = app();

        let response = app.clone().oneshot(get("/policies")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Vec<PolicyView> = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let purposes: Vec<_> = body.iter().map(|p| p.purpose.as_str()).collect();
        assert_eq!(purposes, ["auth:login", "export"]);
        assert_eq!(body[1].identity, IdentityKind::Principal);

        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"OK");

        app.clone().oneshot(admit("auth:login", "")).await.unwrap();
        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(text.contains("turnstile_requests_allowed 1"));
        assert!(text.contains(
            "turnstile_requests_by_purpose{purpose=\"auth:login\",decision=\"allowed\"} 1"
        ));
    }
}
