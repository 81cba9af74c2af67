//! Axum extractors for authentication
//!
//! Read the [`AuthContext`] bound by the pipeline's authentication step.

use axum::{extract::FromRequestParts, http::request::Parts};
use restbase_common::Error;

use crate::context::AuthContext;

/// Authenticated request extractor.
///
/// Only valid on routes behind a pipeline with an authentication step; using
/// it elsewhere is a wiring bug and surfaces as an internal error.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthContext);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| {
                tracing::error!(path = %parts.uri.path(), "AuthUser used on a route without authentication");
                Error::internal(anyhow::anyhow!("no authentication context bound"))
            })
    }
}

/// Like [`AuthUser`] but yields `None` on anonymous routes
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthContext>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<AuthContext>().cloned()))
    }
}
