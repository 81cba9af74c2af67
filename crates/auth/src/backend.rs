//! Concrete authentication backend
//!
//! Runs the fixed check order for one request:
//! 1. parse the bearer token (`auth::malformed`)
//! 2. resolve the public key (`auth::unknown_key`)
//! 3. verify the signature (`auth::signature`)
//! 4. check token age when configured (`auth::expired`)
//! 5. advance the nonce atomically (`auth::replay`)
//!
//! The nonce is touched only after the signature has been verified, so an
//! attacker without the secret cannot burn nonces.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderValue;
use chrono::Utc;
use restbase_common::Error;

use crate::codec::{decode_unverified, extract_bearer_token, UnverifiedToken};
use crate::config::AuthConfig;
use crate::context::AuthContext;
use crate::nonce::NonceTracker;
use crate::pipeline::{PipelineStep, RequestContext};
use crate::principal::PrincipalStore;
use crate::store::{NonceLease, TokenStore};

/// Concrete authentication backend.
///
/// Owns the token store handle and auth configuration. Added to a
/// [`Pipeline`](crate::pipeline::Pipeline) as its authentication step, and
/// exposed to handlers that manage tokens via `FromRef`:
/// ```ignore
/// impl FromRef<AppState> for AuthBackend {
///     fn from_ref(state: &AppState) -> Self {
///         state.auth.clone()
///     }
/// }
/// ```
#[derive(Clone)]
pub struct AuthBackend {
    principals: PrincipalStore,
    nonces: NonceTracker,
    config: AuthConfig,
}

/// A verified request whose nonce advance is not yet durable
#[derive(Debug)]
pub struct PendingAuth {
    context: AuthContext,
    lease: NonceLease,
}

impl PendingAuth {
    pub fn context(&self) -> &AuthContext {
        &self.context
    }

    pub fn into_parts(self) -> (AuthContext, NonceLease) {
        (self.context, self.lease)
    }

    /// Make the nonce advance durable and hand out the context
    pub async fn commit(self) -> Result<AuthContext, Error> {
        let public_key = self.context.public_key().to_string();
        self.lease.commit().await.map_err(|e| {
            tracing::error!(error = %e, public_key = %public_key, "Failed to commit nonce");
            Error::from(e)
        })?;
        Ok(self.context)
    }
}

impl AuthBackend {
    pub fn new(store: Arc<dyn TokenStore>, config: AuthConfig) -> Self {
        Self {
            principals: PrincipalStore::new(store.clone()),
            nonces: NonceTracker::new(store),
            config,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn principals(&self) -> &PrincipalStore {
        &self.principals
    }

    pub fn nonces(&self) -> &NonceTracker {
        &self.nonces
    }

    /// Authenticate a request and commit the nonce immediately
    pub async fn authenticate(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> Result<AuthContext, Error> {
        self.authenticate_pending(authorization).await?.commit().await
    }

    /// Authenticate a request, leaving the nonce advance pending until the
    /// caller commits it. Dropping the result rolls the nonce back.
    pub async fn authenticate_pending(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> Result<PendingAuth, Error> {
        let token = extract_bearer_token(authorization)?;
        let token = decode_unverified(token)?;

        let record = self.principals.resolve(token.public_key()).await?;

        token.verify(record.secret_key()).map_err(|e| {
            tracing::debug!(public_key = %token.public_key(), "Token signature mismatch");
            e
        })?;

        self.check_age(&token)?;

        let lease = self
            .nonces
            .reserve(token.public_key(), token.nonce())
            .await?;

        let mut view = record.view();
        view.last_nonce = token.nonce();
        let context = AuthContext::new(record.owner, view, token.claims);

        Ok(PendingAuth { context, lease })
    }

    fn check_age(&self, token: &UnverifiedToken) -> Result<(), Error> {
        let Some(max_age) = self.config.max_token_age else {
            return Ok(());
        };

        let iat = token
            .header
            .iat
            .ok_or_else(|| Error::malformed_token("iat is required"))?;

        let now = Utc::now().timestamp();
        let skew = i64::try_from(self.config.clock_skew.as_secs()).unwrap_or(i64::MAX);
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);

        if iat > now.saturating_add(skew) {
            return Err(Error::malformed_token("iat is in the future"));
        }
        if now.saturating_sub(iat) > max_age {
            return Err(Error::Expired(Some(format!(
                "token older than {} seconds",
                max_age
            ))));
        }

        Ok(())
    }
}

#[async_trait]
impl PipelineStep for AuthBackend {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let pending = self.authenticate_pending(ctx.authorization()).await?;
        ctx.bind_auth(pending)
    }
}
