//! Token header and payload types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Only supported signing algorithm
pub const ALGORITHM: &str = "HS256";

/// Token type carried in every header
pub const TOKEN_TYPE: &str = "JWT";

/// Token header. Sent in cleartext and trusted only after signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm, always `HS256`
    pub alg: String,
    /// Token type, always `JWT`
    pub typ: String,
    /// Public key identifying the signing token
    pub public_key: String,
    /// Per-request nonce, strictly greater than the last accepted one
    pub nonce: i32,
    /// Issued at (unix seconds), required only when a max token age is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl TokenHeader {
    pub fn new(public_key: impl Into<String>, nonce: i32) -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            typ: TOKEN_TYPE.to_string(),
            public_key: public_key.into(),
            nonce,
            iat: None,
        }
    }

    pub fn with_iat(mut self, iat: i64) -> Self {
        self.iat = Some(iat);
        self
    }
}

/// Application-defined payload claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Request parameters or body this token is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    /// Any other claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the token to the given query parameters or JSON body
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// The bound query, treating `null` and `{}` as unbound
    pub fn bound_query(&self) -> Option<&Value> {
        match &self.query {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(query) => Some(query),
        }
    }
}
