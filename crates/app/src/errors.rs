//! Application error kinds
//!
//! Every kind a handler can raise is listed here and registered with the
//! error boundary at startup. Raising a kind missing from [`ALL`] is treated
//! as an internal error.

use axum::http::StatusCode;
use restbase_common::{ErrorKind, ErrorRegistry, RegistryError};

/// A token may not mint a token that outlives it
pub const LIFETIME_EXCEEDS_PARENT: ErrorKind =
    ErrorKind::new("tokens::lifetime_exceeds_parent", StatusCode::FORBIDDEN);

pub const ALL: &[ErrorKind] = &[LIFETIME_EXCEEDS_PARENT];

/// Registry holding every application error kind
pub fn registry() -> Result<ErrorRegistry, RegistryError> {
    let mut registry = ErrorRegistry::new();
    registry.register_all(ALL.iter().copied())?;
    Ok(registry)
}
