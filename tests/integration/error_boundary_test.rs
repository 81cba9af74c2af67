//! Error normalization and reporting through the full router

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
};
use restbase_auth::TokenClaims;
use restbase_common::{Config, ReportLevel, ReportingConfig};
use serde_json::json;

use crate::common::{signed_request, TestApp};

mod common;

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new();
    let response = app.send(get("/health")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_unknown_route_is_normalized() {
    let app = TestApp::new();
    let response = app.send(get("/v1/nowhere")).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.error_code(), Some("request::not_found"));
    assert_eq!(
        response.headers.get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn test_wrong_method_is_normalized() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.error_code(), Some("request::method_not_allowed"));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = TestApp::with_config(Config {
        request_body_limit: 16,
        ..Config::default()
    });

    let body = json!({"ttl_secs": 3600, "padding": "x".repeat(64)});
    let response = app
        .send(signed_request(
            &app.credentials(),
            Method::POST,
            "/v1/tokens",
            1,
            &TokenClaims::new().with_query(body.clone()),
            Some(&body),
        ))
        .await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.error_code(), Some("request::payload_too_large"));
}

mod test_internal_errors {
    use super::*;

    #[tokio::test]
    async fn test_store_outage_without_debug() {
        let app = TestApp::new();
        app.store.set_unavailable(true);

        let response = app.whoami(1).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.error_code(), Some("internal::error"));
        assert!(response.traceback().is_none());

        // Only the incident id leaks, never the cause
        let detail = response.body["error"]["detail"].as_str().unwrap();
        assert!(detail.starts_with("incident "));
        assert!(!detail.contains("memory store"));
    }

    #[tokio::test]
    async fn test_store_outage_with_debug_has_traceback() {
        let app = TestApp::with_config(Config {
            debug: true,
            ..Config::default()
        });
        app.store.set_unavailable(true);

        let response = app.whoami(1).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.traceback().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_debug_handled_errors_carry_traceback() {
        let app = TestApp::with_config(Config {
            debug: true,
            ..Config::default()
        });

        assert_eq!(app.whoami(1).await.status, StatusCode::OK);
        let response = app.whoami(1).await;
        assert_eq!(response.error_code(), Some("auth::replay"));
        assert!(response.traceback().is_some());
    }
}

mod test_reporting {
    use super::*;

    #[tokio::test]
    async fn test_internal_errors_are_reported() {
        let app = TestApp::new();
        app.store.set_unavailable(true);

        let response = app.whoami(1).await;
        let events = app.reported_events(1).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "internal::error");
        assert_eq!(events[0].level, ReportLevel::Error);

        // The reported incident matches the one the client saw
        let detail = response.body["error"]["detail"].as_str().unwrap();
        let incident = events[0].incident.unwrap().to_string();
        assert!(detail.ends_with(&incident));
    }

    #[tokio::test]
    async fn test_handled_errors_reported_only_when_verbose() {
        let quiet = TestApp::new();
        assert_eq!(quiet.whoami(1).await.status, StatusCode::OK);
        assert_eq!(quiet.whoami(1).await.error_code(), Some("auth::replay"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(quiet.sink.events().is_empty());

        let verbose = TestApp::with_config(Config {
            reporting: ReportingConfig {
                endpoint: None,
                verbose: true,
            },
            ..Config::default()
        });
        assert_eq!(verbose.whoami(1).await.status, StatusCode::OK);
        assert_eq!(verbose.whoami(1).await.error_code(), Some("auth::replay"));

        let events = verbose.reported_events(1).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "auth::replay");
        assert_eq!(events[0].level, ReportLevel::Debug);
        assert_eq!(verbose.sink.verbose_flags(), vec![true]);
    }
}
