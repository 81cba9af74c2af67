//! Replay protection
//!
//! A token's nonce must strictly increase across every request it signs, no
//! matter which server process handles the request. The decision is delegated
//! to the store's atomic compare-and-set; nothing is cached in process.

use std::sync::Arc;

use restbase_common::Error;

use crate::store::{AdvanceOutcome, NonceLease, TokenStore};

#[derive(Clone)]
pub struct NonceTracker {
    store: Arc<dyn TokenStore>,
}

impl NonceTracker {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Accept `nonce` for `public_key`, pending [`NonceLease::commit`]
    pub async fn reserve(&self, public_key: &str, nonce: i32) -> Result<NonceLease, Error> {
        let outcome = self
            .store
            .atomic_advance_nonce(public_key, nonce)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, public_key = %public_key, "Failed to advance nonce");
                Error::from(e)
            })?;

        match outcome {
            AdvanceOutcome::Advanced(lease) => Ok(lease),
            AdvanceOutcome::Stale => {
                tracing::debug!(public_key = %public_key, nonce, "Replayed nonce rejected");
                Err(Error::Replay(None))
            }
            AdvanceOutcome::Inactive => Err(Error::UnknownKey(None)),
        }
    }

    /// Accept `nonce` and make the advance durable immediately
    pub async fn check_and_advance(&self, public_key: &str, nonce: i32) -> Result<(), Error> {
        let lease = self.reserve(public_key, nonce).await?;
        lease.commit().await.map_err(|e| {
            tracing::error!(error = %e, public_key = %public_key, "Failed to commit nonce");
            Error::from(e)
        })
    }
}
