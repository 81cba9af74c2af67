//! Token encoding, decoding and signature verification
//!
//! Wire format: `base64url(header) "." base64url(payload) "." base64url(signature)`,
//! unpadded, where the signature is HMAC-SHA256 over the first two segments
//! joined by `.` and keyed with the token's secret.

use axum::http::HeaderValue;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use restbase_common::Error;
use serde::Deserialize;
use serde_json::Value;

use crate::claims::{TokenClaims, TokenHeader, ALGORITHM, TOKEN_TYPE};

/// Header as it arrives on the wire, before range checks
#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    typ: String,
    public_key: String,
    nonce: Value,
    #[serde(default)]
    iat: Option<i64>,
}

/// A parsed token whose signature has not been checked yet.
///
/// Keeps the original segments so verification signs exactly the bytes the
/// client signed.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    pub header: TokenHeader,
    pub claims: TokenClaims,
    signing_input: String,
    signature: String,
}

impl UnverifiedToken {
    pub fn public_key(&self) -> &str {
        &self.header.public_key
    }

    pub fn nonce(&self) -> i32 {
        self.header.nonce
    }

    /// Check the signature against `secret` in constant time
    pub fn verify(&self, secret: &str) -> Result<(), Error> {
        verify(&self.signing_input, &self.signature, secret)
    }
}

/// Serialize and sign a token
pub fn encode(header: &TokenHeader, claims: &TokenClaims, secret: &str) -> Result<String, Error> {
    let header_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header)?);
    let payload_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header_segment, payload_segment);

    let signature = jsonwebtoken::crypto::sign(
        signing_input.as_bytes(),
        &EncodingKey::from_secret(secret.as_bytes()),
        Algorithm::HS256,
    )
    .map_err(|e| Error::internal(anyhow::anyhow!("token signing failed: {}", e)))?;

    Ok(format!("{}.{}", signing_input, signature))
}

/// Parse a token without checking its signature.
///
/// Any structural problem (segment count, base64, JSON shape, algorithm,
/// nonce range) is a [`Error::MalformedToken`].
pub fn decode_unverified(token: &str) -> Result<UnverifiedToken, Error> {
    let mut segments = token.split('.');
    let (Some(header_segment), Some(payload_segment), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::malformed_token("token must have three segments"));
    };

    if header_segment.is_empty() || payload_segment.is_empty() || signature.is_empty() {
        return Err(Error::malformed_token("token has an empty segment"));
    }

    URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| Error::malformed_token("signature is not base64url"))?;

    let header = decode_header(header_segment)?;
    let claims = decode_segment::<TokenClaims>(payload_segment, "payload")?;

    Ok(UnverifiedToken {
        header,
        claims,
        signing_input: format!("{}.{}", header_segment, payload_segment),
        signature: signature.to_string(),
    })
}

/// Verify `signature` over `signing_input` with HMAC-SHA256
pub fn verify(signing_input: &str, signature: &str, secret: &str) -> Result<(), Error> {
    let valid = jsonwebtoken::crypto::verify(
        signature,
        signing_input.as_bytes(),
        &DecodingKey::from_secret(secret.as_bytes()),
        Algorithm::HS256,
    )
    .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(Error::Signature(None))
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, Error> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::malformed_token(format!("{} is not base64url", what)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::malformed_token(format!("{} is not valid JSON: {}", what, e)))
}

fn decode_header(segment: &str) -> Result<TokenHeader, Error> {
    let raw: RawHeader = decode_segment(segment, "header")?;

    if raw.alg != ALGORITHM {
        return Err(Error::malformed_token(format!(
            "unsupported algorithm '{}'",
            raw.alg
        )));
    }

    if raw.typ != TOKEN_TYPE {
        return Err(Error::malformed_token(format!(
            "unsupported token type '{}'",
            raw.typ
        )));
    }

    if raw.public_key.is_empty() {
        return Err(Error::malformed_token("public_key is empty"));
    }

    let nonce = raw
        .nonce
        .as_i64()
        .filter(|n| (1..=i64::from(i32::MAX)).contains(n))
        .ok_or_else(|| Error::malformed_token("nonce must be a positive 32-bit integer"))?;

    Ok(TokenHeader {
        alg: raw.alg,
        typ: raw.typ,
        public_key: raw.public_key,
        nonce: nonce as i32,
        iat: raw.iat,
    })
}

/// Extract the bearer token from an `Authorization` header
pub fn extract_bearer_token(header: Option<&HeaderValue>) -> Result<&str, Error> {
    let header = header.ok_or_else(|| Error::malformed_token("Authorization header required"))?;

    let header_str = header
        .to_str()
        .map_err(|_| Error::malformed_token("Invalid authorization header format"))?;

    let mut parts = header_str.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token),
        _ => Err(Error::malformed_token(
            "Invalid authorization header format",
        )),
    }
}
