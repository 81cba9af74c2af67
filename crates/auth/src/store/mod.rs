//! Token persistence
//!
//! The nonce advance is the one place where correctness depends on the store:
//! it must be a single atomic compare-and-set, because several server
//! processes may serve the same public key at once.

mod memory;
mod postgres;

pub use memory::MemoryTokenStore;
pub use postgres::PgTokenStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use restbase_common::{random_urlsafe, KEY_LENGTH};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{IssuedToken, TokenRecord};

/// Attempts at drawing a key pair that collides with no existing token
pub const MAX_KEY_ATTEMPTS: usize = 16;

/// Result of [`TokenStore::atomic_advance_nonce`]
#[derive(Debug)]
pub enum AdvanceOutcome {
    /// `last_nonce` was strictly lower and now holds the new nonce, pending commit
    Advanced(NonceLease),
    /// The token exists but `last_nonce` is already at or above the nonce
    Stale,
    /// No usable token: unknown, revoked, expired, or owner inactive
    Inactive,
}

/// Store-specific half of a pending nonce advance.
///
/// Dropping a handle without committing must roll the advance back.
#[async_trait]
pub trait LeaseHandle: Send {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// An accepted nonce that becomes durable only on [`NonceLease::commit`].
///
/// If the request is cancelled before a response is produced the lease is
/// dropped and `last_nonce` returns to its previous value, so the client may
/// retry with the same nonce.
pub struct NonceLease {
    public_key: String,
    nonce: i32,
    handle: Box<dyn LeaseHandle>,
}

impl NonceLease {
    pub fn new(public_key: impl Into<String>, nonce: i32, handle: impl LeaseHandle + 'static) -> Self {
        Self {
            public_key: public_key.into(),
            nonce,
            handle: Box::new(handle),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn nonce(&self) -> i32 {
        self.nonce
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.handle.commit().await
    }
}

impl std::fmt::Debug for NonceLease {
    #[mutants::skip] // Debug output only
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceLease")
            .field("public_key", &self.public_key)
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

/// Persistent token storage shared by every server process
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fetch a token and its owner by public key
    async fn lookup_token(&self, public_key: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Set `last_nonce = nonce` iff the token is usable and `last_nonce < nonce`,
    /// as one indivisible operation
    async fn atomic_advance_nonce(
        &self,
        public_key: &str,
        nonce: i32,
    ) -> Result<AdvanceOutcome, StoreError>;

    /// Create a fresh key pair for an active owner
    async fn issue(
        &self,
        owner_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError>;

    /// Mark a token revoked. Returns false when there was nothing to revoke.
    async fn revoke(&self, public_key: &str) -> Result<bool, StoreError>;
}

/// Draw a public/secret key pair of [`KEY_LENGTH`] url-safe characters
pub(crate) fn generate_key_pair() -> Result<(String, String), StoreError> {
    let draw = || random_urlsafe(KEY_LENGTH).map_err(|e| StoreError::Random(e.to_string()));
    Ok((draw()?, draw()?))
}
