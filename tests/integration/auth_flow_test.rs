//! End-to-end authentication flow through the full router
//!
//! Covers the check order, nonce monotonicity under concurrency, query
//! binding, token issuance and revocation, and cancellation rollback.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header::WWW_AUTHENTICATE, Method, StatusCode},
    middleware,
    routing::get,
    Router,
};
use chrono::Utc;
use restbase_auth::{
    run_pipeline, AuthBackend, AuthConfig, Credentials, Principal, TokenClaims, TokenRecord,
    INITIAL_NONCE,
};
use restbase_common::{Config, RateLimitConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::{signed_request, TestApp, PUBLIC_KEY};

mod common;

mod test_nonce {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_replay_sequence() {
        let app = TestApp::new();

        let response = app.whoami(5).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["token"]["public_key"], PUBLIC_KEY);

        let response = app.whoami(5).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body, json!({"error": {"code": "auth::replay"}}));

        assert_eq!(app.whoami(9).await.status, StatusCode::OK);

        let response = app.whoami(7).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.error_code(), Some("auth::replay"));

        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(9));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_nonce_single_success() {
        let app = Arc::new(TestApp::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let app = app.clone();
            handles.push(tokio::spawn(async move { app.whoami(100).await }));
        }

        let mut ok = 0;
        for handle in handles {
            let response = handle.await.unwrap();
            match response.status {
                StatusCode::OK => ok += 1,
                _ => assert_eq!(response.error_code(), Some("auth::replay")),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(100));
    }

    #[tokio::test]
    async fn test_nonce_bounds() {
        let app = TestApp::new();
        assert_eq!(app.whoami(0).await.error_code(), Some("auth::malformed"));
        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(INITIAL_NONCE));
        assert_eq!(app.whoami(1).await.status, StatusCode::OK);
        assert_eq!(app.whoami(i32::MAX).await.status, StatusCode::OK);
        // Nothing is greater than the largest nonce
        assert_eq!(app.whoami(i32::MAX).await.error_code(), Some("auth::replay"));
    }

    #[tokio::test]
    async fn test_cancelled_request_does_not_consume_nonce() {
        let app = TestApp::new();
        let config = Config::default();
        let auth = AuthBackend::new(Arc::new(app.store.clone()), AuthConfig::default());

        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "too late"
        }

        let slow_router: Router = Router::new()
            .route("/slow", get(slow))
            .route_layer(middleware::from_fn_with_state(
                restbase_app::build_pipeline(&config, auth),
                run_pipeline,
            ));

        let request = signed_request(
            &app.credentials(),
            Method::GET,
            "/slow",
            3,
            &TokenClaims::new(),
            None,
        );
        let result =
            tokio::time::timeout(Duration::from_millis(50), slow_router.oneshot(request)).await;
        assert!(result.is_err(), "handler should still be running");

        // The abandoned request left no trace
        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(INITIAL_NONCE));
        assert_eq!(app.whoami(3).await.status, StatusCode::OK);
    }
}

mod test_check_order {
    use super::*;

    #[tokio::test]
    async fn test_missing_header_is_malformed() {
        let app = TestApp::new();
        let request = axum::http::Request::builder()
            .uri("/v1/whoami")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = app.send(request).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.error_code(), Some("auth::malformed"));
        assert_eq!(response.headers.get(WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let app = TestApp::new();
        let stranger = Credentials::new("pk-unknown", "guess");
        let response = app
            .send(signed_request(
                &stranger,
                Method::GET,
                "/v1/whoami",
                1,
                &TokenClaims::new(),
                None,
            ))
            .await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.error_code(), Some("auth::unknown_key"));
    }

    #[tokio::test]
    async fn test_wrong_secret_leaves_nonce_untouched() {
        let app = TestApp::new();
        let forger = Credentials::new(PUBLIC_KEY, "not-the-secret");
        let response = app
            .send(signed_request(
                &forger,
                Method::GET,
                "/v1/whoami",
                50,
                &TokenClaims::new(),
                None,
            ))
            .await;

        assert_eq!(response.error_code(), Some("auth::signature"));
        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(INITIAL_NONCE));

        // The real owner can still use nonce 50
        assert_eq!(app.whoami(50).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_inactive_owner_is_unknown_key() {
        let app = TestApp::new();
        app.store.set_principal_active(app.owner.id, false);

        assert_eq!(app.whoami(1).await.error_code(), Some("auth::unknown_key"));
    }

    #[tokio::test]
    async fn test_expired_record_is_unknown_key() {
        let app = TestApp::new();
        let owner = Principal::new("bob");
        app.store.insert_token(
            TokenRecord::new("pk-old", "s-old", owner)
                .with_expiry(Utc::now() - chrono::Duration::minutes(1)),
        );

        let response = app
            .send(signed_request(
                &Credentials::new("pk-old", "s-old"),
                Method::GET,
                "/v1/whoami",
                1,
                &TokenClaims::new(),
                None,
            ))
            .await;
        assert_eq!(response.error_code(), Some("auth::unknown_key"));
    }

    #[tokio::test]
    async fn test_max_token_age() {
        let app = TestApp::with_config(Config {
            token_max_age_secs: Some(60),
            ..Config::default()
        });
        let credentials = app.credentials();

        // No iat at all
        assert_eq!(app.whoami(1).await.error_code(), Some("auth::malformed"));

        let token = credentials.sign_now(2, &TokenClaims::new()).unwrap();
        let request = axum::http::Request::builder()
            .uri("/v1/whoami")
            .header("authorization", format!("Bearer {}", token))
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(app.send(request).await.status, StatusCode::OK);
    }
}

mod test_query_binding {
    use super::*;

    #[tokio::test]
    async fn test_signed_query_params() {
        let app = TestApp::new();
        let claims = TokenClaims::new().with_query(json!({"key": "value"}));

        let response = app
            .send(signed_request(
                &app.credentials(),
                Method::GET,
                "/v1/whoami?key=value",
                1,
                &claims,
                None,
            ))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["claims"]["query"], json!({"key": "value"}));
    }

    #[tokio::test]
    async fn test_mismatch_rolls_back_nonce() {
        let app = TestApp::new();
        let claims = TokenClaims::new().with_query(json!({"key": "value"}));

        let response = app
            .send(signed_request(
                &app.credentials(),
                Method::GET,
                "/v1/whoami?key=tampered",
                4,
                &claims,
                None,
            ))
            .await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.error_code(), Some("auth::query_mismatch"));
        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(INITIAL_NONCE));

        let response = app
            .send(signed_request(
                &app.credentials(),
                Method::GET,
                "/v1/whoami?key=value",
                4,
                &claims,
                None,
            ))
            .await;
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unbound_token_with_params_is_rejected() {
        let app = TestApp::new();
        let response = app.signed(Method::GET, "/v1/whoami?extra=1", 1).await;
        assert_eq!(response.error_code(), Some("auth::query_mismatch"));
    }
}

mod test_tokens {
    use super::*;

    async fn issue(app: &TestApp, nonce: i32, body: Value) -> crate::common::TestResponse {
        let claims = TokenClaims::new().with_query(body.clone());
        app.send(signed_request(
            &app.credentials(),
            Method::POST,
            "/v1/tokens",
            nonce,
            &claims,
            Some(&body),
        ))
        .await
    }

    #[tokio::test]
    async fn test_issue_and_use_new_token() {
        let app = TestApp::new();

        let response = issue(&app, 1, json!({"ttl_secs": 3600})).await;
        assert_eq!(response.status, StatusCode::CREATED);

        let public_key = response.body["public_key"].as_str().unwrap().to_string();
        let secret_key = response.body["secret_key"].as_str().unwrap().to_string();
        assert_eq!(public_key.len(), 40);
        assert_ne!(public_key, PUBLIC_KEY);

        let issued = Credentials::new(public_key.clone(), secret_key);
        let response = app
            .send(signed_request(
                &issued,
                Method::GET,
                "/v1/whoami",
                1,
                &TokenClaims::new(),
                None,
            ))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["token"]["public_key"], public_key);
        assert_eq!(response.body["principal"]["id"], app.owner.id.to_string());
        assert!(response.body["token"].get("secret_key").is_none());
    }

    #[tokio::test]
    async fn test_issue_rejects_invalid_ttl() {
        let app = TestApp::new();
        let response = issue(&app, 1, json!({"ttl_secs": 5})).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error_code(), Some("request::invalid"));
    }

    #[tokio::test]
    async fn test_issue_cannot_outlive_signing_token() {
        let app = TestApp::new();
        let owner = app.owner.clone();
        app.store.insert_token(
            TokenRecord::new("pk-short", "s-short", owner)
                .with_expiry(Utc::now() + chrono::Duration::minutes(10)),
        );

        let body = json!({"ttl_secs": 86400});
        let response = app
            .send(signed_request(
                &Credentials::new("pk-short", "s-short"),
                Method::POST,
                "/v1/tokens",
                1,
                &TokenClaims::new().with_query(body.clone()),
                Some(&body),
            ))
            .await;

        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(
            response.error_code(),
            Some("tokens::lifetime_exceeds_parent")
        );
    }

    #[tokio::test]
    async fn test_revoke_current_token() {
        let app = TestApp::new();

        let response = app.signed(Method::DELETE, "/v1/tokens/current", 1).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(1));

        assert_eq!(app.whoami(2).await.error_code(), Some("auth::unknown_key"));
    }
}

mod test_rate_limit {
    use super::*;

    #[tokio::test]
    async fn test_limit_per_token() {
        let app = TestApp::with_config(Config {
            rate_limit: Some(RateLimitConfig {
                max_requests: 2,
                window_secs: 60,
            }),
            ..Config::default()
        });

        assert_eq!(app.whoami(1).await.status, StatusCode::OK);
        assert_eq!(app.whoami(2).await.status, StatusCode::OK);

        let response = app.whoami(3).await;
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.error_code(), Some("request::rate_limited"));
        // Rejected requests do not consume their nonce
        assert_eq!(app.store.last_nonce(PUBLIC_KEY), Some(2));
    }
}
