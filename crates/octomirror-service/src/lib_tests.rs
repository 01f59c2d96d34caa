//! HTTP-surface tests: webhook endpoint contract, auth gating, error
//! envelope, and operator authentication.

use super::*;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use hmac::Mac;
use octomirror_github::auth::AccessToken;

const WEBHOOK_SECRET: &str = "test-webhook-secret";
const OPS_TOKEN: &str = "test-ops-token";

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.github.webhook_secret = WEBHOOK_SECRET.to_string();
    config.github.client_id = "client".to_string();
    config.github.client_secret = "secret".to_string();
    config.sync.ops_token = OPS_TOKEN.to_string();
    config
}

fn server() -> (AppState, TestServer) {
    let state = AppState::new(test_config()).unwrap();
    let server = TestServer::new(create_router(state.clone())).unwrap();
    (state, server)
}

fn name(value: &'static str) -> HeaderName {
    HeaderName::from_static(value)
}

fn value(raw: &str) -> HeaderValue {
    HeaderValue::from_str(raw).unwrap()
}

fn sign(body: &[u8]) -> String {
    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn webhook_payload() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "action": "opened",
        "repository": {
            "id": 500,
            "name": "mirror",
            "full_name": "octocat/mirror",
            "owner": { "id": 7, "login": "octocat", "type": "User" },
        },
        "pull_request": {
            "id": 9007,
            "number": 7,
            "title": "A change",
            "state": "open",
            "head": { "ref": "feature", "sha": "abc" },
            "base": { "ref": "main", "sha": "def" },
        },
    }))
    .unwrap()
}

// ============================================================================
// Webhook endpoint
// ============================================================================

mod webhook_endpoint_tests {
    use super::*;

    /// A correctly signed delivery returns 200 {received, queued}.
    #[tokio::test]
    async fn test_signed_delivery_accepted() {
        let (_, server) = server();
        let body = webhook_payload();

        let response = server
            .post("/api/github/webhook")
            .add_header(name("x-github-event"), value("pull_request"))
            .add_header(name("x-github-delivery"), value("d-1"))
            .add_header(name("x-hub-signature-256"), value(&sign(&body)))
            .bytes(body.into())
            .await;

        response.assert_status_ok();
        let json: serde_json::Value = response.json();
        assert_eq!(json["received"], true);
        assert_eq!(json["queued"], true);
        assert!(json["queue_item_id"].is_string());
    }

    /// Replaying a delivery ID returns 200 {duplicate} and enqueues once.
    #[tokio::test]
    async fn test_duplicate_delivery_suppressed() {
        let (state, server) = server();
        let body = webhook_payload();

        let first = server
            .post("/api/github/webhook")
            .add_header(name("x-github-event"), value("pull_request"))
            .add_header(name("x-github-delivery"), value("d-1"))
            .add_header(name("x-hub-signature-256"), value(&sign(&body)))
            .bytes(body.clone().into())
            .await;
        first.assert_status_ok();

        let second = server
            .post("/api/github/webhook")
            .add_header(name("x-github-event"), value("pull_request"))
            .add_header(name("x-github-delivery"), value("d-1"))
            .add_header(name("x-hub-signature-256"), value(&sign(&body)))
            .bytes(body.into())
            .await;
        second.assert_status_ok();
        let json: serde_json::Value = second.json();
        assert_eq!(json["duplicate"], true);

        let counts = state.queue.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
    }

    /// A signature over different bytes yields 401 and enqueues nothing.
    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let (state, server) = server();
        let body = webhook_payload();

        let response = server
            .post("/api/github/webhook")
            .add_header(name("x-github-event"), value("pull_request"))
            .add_header(name("x-github-delivery"), value("d-1"))
            .add_header(name("x-hub-signature-256"), value(&sign(b"different body")))
            .bytes(body.into())
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(state.queue.counts().await.unwrap().pending, 0);
    }

    /// A missing delivery header yields 400.
    #[tokio::test]
    async fn test_missing_delivery_header_rejected() {
        let (_, server) = server();
        let body = webhook_payload();

        let response = server
            .post("/api/github/webhook")
            .add_header(name("x-github-event"), value("pull_request"))
            .add_header(name("x-hub-signature-256"), value(&sign(&body)))
            .bytes(body.into())
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    /// A signed but malformed body yields 400.
    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let (_, server) = server();
        let body = b"{not json".to_vec();

        let response = server
            .post("/api/github/webhook")
            .add_header(name("x-github-event"), value("pull_request"))
            .add_header(name("x-github-delivery"), value("d-1"))
            .add_header(name("x-hub-signature-256"), value(&sign(&body)))
            .bytes(body.into())
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }
}

// ============================================================================
// User auth gating
// ============================================================================

mod auth_gating_tests {
    use super::*;
    use octomirror_github::auth::TokenStore;

    /// Without a bearer token, sync endpoints fail with auth_missing.
    #[tokio::test]
    async fn test_sync_requires_bearer() {
        let (_, server) = server();

        let response = server.post("/api/github/sync/overview").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = response.json();
        assert_eq!(json["code"], "auth_missing");
        assert!(json["error"].is_string());
    }

    /// With the token stamped invalid, sync endpoints return auth_invalid
    /// without any GitHub traffic.
    #[tokio::test]
    async fn test_invalid_token_short_circuits() {
        let (state, server) = server();
        state
            .tokens
            .save("primary", &AccessToken::new("gho_x"))
            .await
            .unwrap();
        state
            .tokens
            .invalidate("primary", "Bad credentials")
            .await
            .unwrap();

        let response = server
            .post("/api/github/sync/overview")
            .add_header(name("authorization"), value("Bearer primary"))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = response.json();
        assert_eq!(json["code"], "auth_invalid");
    }
}

// ============================================================================
// Operator endpoints
// ============================================================================

mod ops_auth_tests {
    use super::*;

    /// The queue endpoints reject user tokens and accept the operator
    /// token.
    #[tokio::test]
    async fn test_ops_endpoints_require_operator_token() {
        let (_, server) = server();

        let unauthenticated = server.get("/api/github/webhook-health").await;
        unauthenticated.assert_status(StatusCode::UNAUTHORIZED);

        let wrong = server
            .get("/api/github/webhook-health")
            .add_header(name("authorization"), value("Bearer primary"))
            .await;
        wrong.assert_status(StatusCode::UNAUTHORIZED);

        let ok = server
            .get("/api/github/webhook-health")
            .add_header(name("authorization"), value(&format!("Bearer {}", OPS_TOKEN)))
            .await;
        ok.assert_status_ok();
        let json: serde_json::Value = ok.json();
        assert_eq!(json["health"], "ok");
        assert!(json["queue"]["pending"].is_number());
        assert!(json["alerts"].is_array());
    }

    /// The queue listing starts empty and unknown actions are rejected.
    #[tokio::test]
    async fn test_queue_listing_and_actions() {
        let (_, server) = server();

        let list = server
            .get("/api/github/webhook-queue")
            .add_header(name("authorization"), value(&format!("Bearer {}", OPS_TOKEN)))
            .await;
        list.assert_status_ok();
        let json: serde_json::Value = list.json();
        assert_eq!(json["count"], 0);

        let bad = server
            .post("/api/github/webhook-queue")
            .add_header(name("authorization"), value(&format!("Bearer {}", OPS_TOKEN)))
            .json(&serde_json::json!({ "action": "explode" }))
            .await;
        bad.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        let retry_all = server
            .post("/api/github/webhook-queue")
            .add_header(name("authorization"), value(&format!("Bearer {}", OPS_TOKEN)))
            .json(&serde_json::json!({ "action": "retry-all" }))
            .await;
        retry_all.assert_status_ok();
    }
}

// ============================================================================
// Ambient endpoints
// ============================================================================

mod ambient_tests {
    use super::*;

    /// healthz and metrics respond without auth.
    #[tokio::test]
    async fn test_health_and_metrics() {
        let (_, server) = server();

        let health = server.get("/healthz").await;
        health.assert_status_ok();
        let json: serde_json::Value = health.json();
        assert_eq!(json["status"], "ok");

        let metrics = server.get("/metrics").await;
        metrics.assert_status_ok();
    }

    /// The rate-limit endpoint returns an (initially empty) snapshot.
    #[tokio::test]
    async fn test_rate_limit_snapshot() {
        let (_, server) = server();

        let response = server.get("/api/github/rate-limit").await;
        response.assert_status_ok();
        let json: serde_json::Value = response.json();
        assert!(json["resources"].is_array());
    }
}
