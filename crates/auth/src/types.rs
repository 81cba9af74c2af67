//! Token store read-model types
//!
//! `TokenRecord` carries the secret key and never leaves the auth crate's
//! verification path; handlers see the secret-free `TokenView`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Initial `last_nonce` of a freshly issued token, so any nonce in `0..` is accepted first
pub const INITIAL_NONCE: i32 = i32::MIN;

/// Owner of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Principal {
    pub id: Uuid,
    pub username: Option<String>,
    pub is_active: bool,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: Some(username.into()),
            is_active: true,
        }
    }
}

/// Persistent token row joined with its owner
#[derive(Clone)]
pub struct TokenRecord {
    pub public_key: String,
    secret_key: String,
    pub last_nonce: i32,
    pub owner: Principal,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(
        public_key: impl Into<String>,
        secret_key: impl Into<String>,
        owner: Principal,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
            last_nonce: INITIAL_NONCE,
            owner,
            expires_at: None,
            revoked_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Usable for authentication: not revoked, not expired, owner active
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && !self.is_expired(now) && self.owner.is_active
    }

    pub fn view(&self) -> TokenView {
        TokenView {
            public_key: self.public_key.clone(),
            owner_id: self.owner.id,
            last_nonce: self.last_nonce,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("last_nonce", &self.last_nonce)
            .field("owner", &self.owner)
            .field("expires_at", &self.expires_at)
            .field("revoked_at", &self.revoked_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Authenticated token, excluding the secret key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenView {
    pub public_key: String,
    pub owner_id: Uuid,
    pub last_nonce: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A newly issued key pair. The only time the secret is handed out.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub public_key: String,
    pub secret_key: String,
    pub expires_at: Option<DateTime<Utc>>,
}
