//! Authentication context bound to a request

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::claims::TokenClaims;
use crate::types::{Principal, TokenView};

/// Represents an authenticated request.
///
/// Bound once by the authentication step and handed to handlers as an
/// immutable value; nothing downstream can rebind it.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub principal: Principal,
    pub token: TokenView,
    pub claims: TokenClaims,
}

impl AuthContext {
    pub fn new(principal: Principal, token: TokenView, claims: TokenClaims) -> Self {
        Self {
            principal,
            token,
            claims,
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.principal.id
    }

    pub fn public_key(&self) -> &str {
        &self.token.public_key
    }

    /// Nonce accepted for this request
    pub fn nonce(&self) -> i32 {
        self.token.last_nonce
    }

    /// Look up an application claim from the token payload
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.extra.get(name)
    }
}
