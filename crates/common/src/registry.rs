//! Startup registry of application-defined error kinds
//!
//! Business errors are an open set, but every code that can reach a caller has
//! to be declared up front. The error boundary treats an unregistered code as
//! a programming error and reports it as `internal::error`.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::error::ErrorKind;

/// Namespaces owned by the built-in variants
const RESERVED_NAMESPACES: &[&str] = &["auth", "request", "internal"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid error code '{0}': expected lowercase 'namespace::name'")]
    InvalidCode(String),

    #[error("Error code '{0}' uses a reserved namespace")]
    ReservedNamespace(String),

    #[error("Error code '{0}' must map to a 4xx or 5xx status")]
    InvalidStatus(String),

    #[error("Error code '{0}' is already registered with a different status")]
    Conflict(String),
}

/// Check the `namespace::name[::more]` shape of an error code
pub fn is_namespaced(code: &str) -> bool {
    let segments: Vec<&str> = code.split("::").collect();
    segments.len() >= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}

/// Set of business error kinds declared by the application
#[derive(Debug, Clone, Default)]
pub struct ErrorRegistry {
    kinds: BTreeMap<&'static str, ErrorKind>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Registering the same kind twice is a no-op.
    pub fn register(&mut self, kind: ErrorKind) -> Result<&mut Self, RegistryError> {
        let code = kind.code();

        if !is_namespaced(code) {
            return Err(RegistryError::InvalidCode(code.to_string()));
        }

        let namespace = code.split("::").next().unwrap_or_default();
        if RESERVED_NAMESPACES.contains(&namespace) {
            return Err(RegistryError::ReservedNamespace(code.to_string()));
        }

        if !(kind.status().is_client_error() || kind.status().is_server_error()) {
            return Err(RegistryError::InvalidStatus(code.to_string()));
        }

        match self.kinds.get(code) {
            Some(existing) if *existing != kind => {
                Err(RegistryError::Conflict(code.to_string()))
            }
            _ => {
                self.kinds.insert(code, kind);
                Ok(self)
            }
        }
    }

    /// Register several kinds, stopping at the first invalid one
    pub fn register_all(
        &mut self,
        kinds: impl IntoIterator<Item = ErrorKind>,
    ) -> Result<&mut Self, RegistryError> {
        for kind in kinds {
            self.register(kind)?;
        }
        Ok(self)
    }

    /// True when this exact kind (code and status) was registered
    pub fn contains(&self, kind: &ErrorKind) -> bool {
        self.kinds.get(kind.code()) == Some(kind)
    }

    pub fn get(&self, code: &str) -> Option<ErrorKind> {
        self.kinds.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
