//! HTTP handlers

use std::time::Duration;

use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::Utc;
use restbase_auth::{AuthBackend, AuthContext, AuthUser, IssuedToken, PendingNonce};
use restbase_common::{Error, ValidatedJson};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::LIFETIME_EXCEEDS_PARENT;

/// Body of `POST /v1/tokens`
#[derive(Debug, Deserialize, Validate)]
pub struct IssueTokenRequest {
    /// Requested lifetime; defaults to the configured TTL, capped by the caller's own token
    #[validate(range(min = 60, max = 31_536_000))]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Issue a new key pair to the caller's principal
pub async fn issue_token(
    State(auth): State<AuthBackend>,
    AuthUser(ctx): AuthUser,
    Extension(pending): Extension<PendingNonce>,
    ValidatedJson(request): ValidatedJson<IssueTokenRequest>,
) -> Result<(StatusCode, Json<IssuedToken>), Error> {
    let parent_remaining = ctx
        .token
        .expires_at
        .map(|expires_at| (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO));

    let ttl = match (request.ttl_secs, parent_remaining) {
        (Some(secs), Some(remaining)) if Duration::from_secs(secs) > remaining => {
            return Err(LIFETIME_EXCEEDS_PARENT.with_detail(format!(
                "requested {}s but the signing token expires in {}s",
                secs,
                remaining.as_secs()
            )));
        }
        (Some(secs), _) => Duration::from_secs(secs),
        (None, Some(remaining)) => auth.config().default_token_ttl.min(remaining),
        (None, None) => auth.config().default_token_ttl,
    };

    // Release the lease's connection before asking the pool for another
    pending.commit().await?;
    let issued = auth.principals().issue(&ctx.principal, ttl).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// Describe the authenticated principal and token
pub async fn whoami(AuthUser(ctx): AuthUser) -> Json<AuthContext> {
    Json(ctx)
}

/// Revoke the token that signed this request
pub async fn revoke_current(
    State(auth): State<AuthBackend>,
    AuthUser(ctx): AuthUser,
    Extension(pending): Extension<PendingNonce>,
) -> Result<StatusCode, Error> {
    // The open nonce lease holds this token's row and a pooled connection
    pending.commit().await?;
    auth.principals().revoke(ctx.public_key()).await?;
    Ok(StatusCode::NO_CONTENT)
}
