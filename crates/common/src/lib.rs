//! Shared error handling, reporting, and configuration for restbase
//!
//! This crate provides the ambient layer every restbase crate relies on:
//! - The closed error taxonomy and its HTTP rendering
//! - The error boundary middleware and best-effort error reporting
//! - Configuration management following 12-factor principles
//! - Small request utilities (client address, random key material)

pub mod boundary;
pub mod config;
pub mod crypto;
pub mod error;
pub mod extractors;
pub mod ip;
pub mod registry;
pub mod reporting;

pub use boundary::{error_boundary, panic_response, ErrorBoundary};
pub use config::{Config, ConfigError, RateLimitConfig, ReportingConfig};
pub use crypto::{random_urlsafe, KEY_LENGTH};
pub use error::{codes, Error, ErrorBody, ErrorDetail, ErrorKind, ErrorReport, Result};
pub use extractors::ValidatedJson;
pub use ip::client_ip;
pub use registry::{ErrorRegistry, RegistryError};
pub use reporting::{ErrorEvent, ReportError, ReportLevel, Reporter, ReportingSink};
