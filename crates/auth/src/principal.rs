//! Principal resolution and token lifecycle

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use restbase_common::Error;

use crate::store::TokenStore;
use crate::types::{IssuedToken, Principal, TokenRecord};

/// Resolves public keys to their token and owner
#[derive(Clone)]
pub struct PrincipalStore {
    store: Arc<dyn TokenStore>,
}

impl PrincipalStore {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Load a usable token by public key.
    ///
    /// Missing, revoked and expired tokens, and tokens of inactive owners,
    /// are all [`Error::UnknownKey`].
    pub async fn resolve(&self, public_key: &str) -> Result<TokenRecord, Error> {
        let record = self
            .store
            .lookup_token(public_key)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, public_key = %public_key, "Failed to load token");
                Error::from(e)
            })?
            .ok_or(Error::UnknownKey(None))?;

        if !record.is_usable(Utc::now()) {
            tracing::debug!(public_key = %public_key, "Token is revoked, expired or owned by an inactive principal");
            return Err(Error::UnknownKey(None));
        }

        Ok(record)
    }

    /// Issue a new key pair for `owner`, valid for `ttl`
    pub async fn issue(&self, owner: &Principal, ttl: Duration) -> Result<IssuedToken, Error> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::internal(anyhow::anyhow!("token lifetime out of range: {}", e)))?;
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::internal(anyhow::anyhow!("token expiry overflows")))?;

        let issued = self
            .store
            .issue(owner.id, Some(expires_at))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, owner_id = %owner.id, "Failed to issue token");
                Error::from(e)
            })?;

        tracing::info!(owner_id = %owner.id, public_key = %issued.public_key, "Token issued");
        Ok(issued)
    }

    /// Revoke a token; revoking an unknown or already revoked token is [`Error::UnknownKey`]
    pub async fn revoke(&self, public_key: &str) -> Result<(), Error> {
        let revoked = self.store.revoke(public_key).await.map_err(|e| {
            tracing::error!(error = %e, public_key = %public_key, "Failed to revoke token");
            Error::from(e)
        })?;

        if !revoked {
            return Err(Error::UnknownKey(None));
        }

        tracing::info!(public_key = %public_key, "Token revoked");
        Ok(())
    }
}
