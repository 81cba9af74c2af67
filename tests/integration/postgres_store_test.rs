//! PostgreSQL token store against a live database
//!
//! Run with `cargo test -p restbase-integration-tests --test postgres_store_test -- --ignored`
//! and `TEST_DATABASE_URL` (or `DATABASE_URL`) pointing at a scratch database.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use restbase_auth::{AdvanceOutcome, PgTokenStore, Principal, TokenStore, INITIAL_NONCE};
use restbase_common::{Config, Reporter};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::common::{signed_request, test_database_url, TestResponse};

mod common;

async fn setup_store() -> PgTokenStore {
    setup_store_with_pool(16).await
}

async fn setup_store_with_pool(max_connections: u32) -> PgTokenStore {
    let url = test_database_url().expect("TEST_DATABASE_URL or DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    PgTokenStore::new(pool, "auth_tokens").expect("Default table name is valid")
}

async fn create_user(pool: &PgPool) -> Principal {
    let principal = Principal::new(format!("user-{}", Uuid::new_v4()));
    sqlx::query("INSERT INTO users (id, username, is_active) VALUES ($1, $2, TRUE)")
        .bind(principal.id)
        .bind(&principal.username)
        .execute(pool)
        .await
        .expect("Failed to insert user");
    principal
}

async fn last_nonce(store: &PgTokenStore, public_key: &str) -> i32 {
    store
        .lookup_token(public_key)
        .await
        .unwrap()
        .expect("token exists")
        .last_nonce
}

#[test_log::test(tokio::test)]
#[ignore = "requires DATABASE_URL"]
async fn test_issue_and_lookup() {
    let store = setup_store().await;
    let owner = create_user(store.pool()).await;

    let issued = store.issue(owner.id, None).await.unwrap();
    let record = store.lookup_token(&issued.public_key).await.unwrap().unwrap();

    assert_eq!(record.owner, owner);
    assert_eq!(record.secret_key(), issued.secret_key);
    assert_eq!(record.last_nonce, INITIAL_NONCE);
    assert!(record.is_usable(Utc::now()));

    assert!(store.lookup_token("no-such-key").await.unwrap().is_none());
}

#[test_log::test(tokio::test)]
#[ignore = "requires DATABASE_URL"]
async fn test_advance_is_strictly_increasing() {
    let store = setup_store().await;
    let owner = create_user(store.pool()).await;
    let issued = store.issue(owner.id, None).await.unwrap();
    let key = issued.public_key.as_str();

    for (nonce, advanced) in [(5, true), (5, false), (9, true), (7, false)] {
        match store.atomic_advance_nonce(key, nonce).await.unwrap() {
            AdvanceOutcome::Advanced(lease) => {
                assert!(advanced, "nonce {} should be stale", nonce);
                lease.commit().await.unwrap();
            }
            AdvanceOutcome::Stale => assert!(!advanced, "nonce {} should advance", nonce),
            AdvanceOutcome::Inactive => panic!("token should be usable"),
        }
    }

    assert_eq!(last_nonce(&store, key).await, 9);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_advance_has_single_winner() {
    let store = Arc::new(setup_store().await);
    let owner = create_user(store.pool()).await;
    let issued = store.issue(owner.id, None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let key = issued.public_key.clone();
        handles.push(tokio::spawn(async move {
            match store.atomic_advance_nonce(&key, 42).await.unwrap() {
                AdvanceOutcome::Advanced(lease) => {
                    lease.commit().await.unwrap();
                    true
                }
                _ => false,
            }
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(last_nonce(&store, &issued.public_key).await, 42);
}

#[test_log::test(tokio::test)]
#[ignore = "requires DATABASE_URL"]
async fn test_dropped_lease_rolls_back() {
    let store = setup_store().await;
    let owner = create_user(store.pool()).await;
    let issued = store.issue(owner.id, None).await.unwrap();
    let key = issued.public_key.as_str();

    match store.atomic_advance_nonce(key, 3).await.unwrap() {
        AdvanceOutcome::Advanced(lease) => drop(lease),
        other => panic!("expected advance, got {:?}", other),
    }

    assert_eq!(last_nonce(&store, key).await, INITIAL_NONCE);

    // The same nonce is accepted once the abandoned advance is gone
    assert!(matches!(
        store.atomic_advance_nonce(key, 3).await.unwrap(),
        AdvanceOutcome::Advanced(_)
    ));
}

#[test_log::test(tokio::test)]
#[ignore = "requires DATABASE_URL"]
async fn test_unusable_tokens_are_inactive() {
    let store = setup_store().await;
    let owner = create_user(store.pool()).await;

    let expired = store
        .issue(owner.id, Some(Utc::now() - Duration::minutes(1)))
        .await
        .unwrap();
    assert!(matches!(
        store.atomic_advance_nonce(&expired.public_key, 1).await.unwrap(),
        AdvanceOutcome::Inactive
    ));

    let revoked = store.issue(owner.id, None).await.unwrap();
    assert!(store.revoke(&revoked.public_key).await.unwrap());
    assert!(!store.revoke(&revoked.public_key).await.unwrap());
    assert!(matches!(
        store.atomic_advance_nonce(&revoked.public_key, 1).await.unwrap(),
        AdvanceOutcome::Inactive
    ));

    assert!(matches!(
        store.atomic_advance_nonce("no-such-key", 1).await.unwrap(),
        AdvanceOutcome::Inactive
    ));
}

#[test_log::test(tokio::test)]
#[ignore = "requires DATABASE_URL"]
async fn test_inactive_owner() {
    let store = setup_store().await;
    let owner = create_user(store.pool()).await;
    let issued = store.issue(owner.id, None).await.unwrap();

    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
        .bind(owner.id)
        .execute(store.pool())
        .await
        .unwrap();

    assert!(matches!(
        store.atomic_advance_nonce(&issued.public_key, 1).await.unwrap(),
        AdvanceOutcome::Inactive
    ));
    assert!(store.issue(owner.id, None).await.is_err());
}

#[test_log::test(tokio::test)]
#[ignore = "requires DATABASE_URL"]
async fn test_replay_through_router() {
    use axum::{body::Body, http::Request};
    use restbase_auth::{Credentials, TokenClaims};
    use tower::ServiceExt;

    let store = setup_store().await;
    let owner = create_user(store.pool()).await;
    let issued = store.issue(owner.id, None).await.unwrap();
    let credentials = Credentials::from(&issued);

    let router = restbase_app::create_app(
        &Config::default(),
        Arc::new(store.clone()),
        Reporter::disabled(),
    )
    .unwrap();

    let whoami = |nonce: i32| {
        let bearer = credentials.bearer(nonce, &TokenClaims::new()).unwrap();
        Request::builder()
            .uri("/v1/whoami")
            .header("authorization", bearer)
            .body(Body::empty())
            .unwrap()
    };

    let first = router.clone().oneshot(whoami(1)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let replay = TestResponse::read(router.clone().oneshot(whoami(1)).await.unwrap()).await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay.error_code(), Some("auth::replay"));

    assert_eq!(last_nonce(&store, &issued.public_key).await, 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_issuance_fits_small_pool() {
    use axum::http::Method;
    use restbase_auth::{Credentials, TokenClaims};
    use serde_json::json;
    use tower::ServiceExt;

    // Fewer connections than concurrent requests, each of which holds a lease
    let store = setup_store_with_pool(2).await;
    let owner = create_user(store.pool()).await;

    let mut signers = Vec::new();
    for _ in 0..8 {
        let issued = store.issue(owner.id, None).await.unwrap();
        signers.push(Credentials::from(&issued));
    }

    let router = restbase_app::create_app(
        &Config::default(),
        Arc::new(store.clone()),
        Reporter::disabled(),
    )
    .unwrap();

    let body = json!({"ttl_secs": 3600});
    let mut handles = Vec::new();
    for credentials in &signers {
        let request = signed_request(
            credentials,
            Method::POST,
            "/v1/tokens",
            1,
            &TokenClaims::new().with_query(body.clone()),
            Some(&body),
        );
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            TestResponse::read(router.oneshot(request).await.unwrap()).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    }

    for credentials in &signers {
        assert_eq!(last_nonce(&store, credentials.public_key()).await, 1);
    }
}
