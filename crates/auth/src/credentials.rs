//! Client-side signing helper
//!
//! Builds `Authorization` values the way a client holding a key pair would.
//! Used by the integration tests and by operators poking at a running server.

use chrono::Utc;
use restbase_common::Error;

use crate::claims::{TokenClaims, TokenHeader};
use crate::codec::encode;
use crate::types::IssuedToken;

/// A public/secret key pair held by a client
#[derive(Clone)]
pub struct Credentials {
    public_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign a token for one request
    pub fn sign(&self, nonce: i32, claims: &TokenClaims) -> Result<String, Error> {
        encode(&TokenHeader::new(&self.public_key, nonce), claims, &self.secret_key)
    }

    /// Sign a token stamped with the current time as `iat`
    pub fn sign_now(&self, nonce: i32, claims: &TokenClaims) -> Result<String, Error> {
        let header = TokenHeader::new(&self.public_key, nonce).with_iat(Utc::now().timestamp());
        encode(&header, claims, &self.secret_key)
    }

    /// Full `Authorization` header value
    pub fn bearer(&self, nonce: i32, claims: &TokenClaims) -> Result<String, Error> {
        Ok(format!("Bearer {}", self.sign(nonce, claims)?))
    }
}

impl From<&IssuedToken> for Credentials {
    fn from(issued: &IssuedToken) -> Self {
        Self::new(issued.public_key.clone(), issued.secret_key.clone())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
