//! Error taxonomy for restbase
//!
//! Every failure in the serving pipeline ends up as an [`Error`]. Each variant
//! maps to a stable namespaced code and a fixed HTTP status. Application-defined
//! failures use [`ErrorKind`] values that are registered at startup with the
//! [`ErrorRegistry`](crate::registry::ErrorRegistry).

use std::sync::Arc;

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reporting::ReportLevel;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes of the built-in variants
pub mod codes {
    pub const MALFORMED_TOKEN: &str = "auth::malformed";
    pub const UNKNOWN_KEY: &str = "auth::unknown_key";
    pub const SIGNATURE: &str = "auth::signature";
    pub const REPLAY: &str = "auth::replay";
    pub const EXPIRED: &str = "auth::expired";
    pub const QUERY_MISMATCH: &str = "auth::query_mismatch";
    pub const RATE_LIMITED: &str = "request::rate_limited";
    pub const INVALID_REQUEST: &str = "request::invalid";
    pub const NOT_FOUND: &str = "request::not_found";
    pub const METHOD_NOT_ALLOWED: &str = "request::method_not_allowed";
    pub const PAYLOAD_TOO_LARGE: &str = "request::payload_too_large";
    pub const UNSUPPORTED_MEDIA_TYPE: &str = "request::unsupported_media_type";
    pub const INTERNAL: &str = "internal::error";
}

/// Application-defined error kind.
///
/// Declared as a constant by the application and registered once at startup:
/// ```ignore
/// const INSUFFICIENT_CREDITS: ErrorKind =
///     ErrorKind::new("billing::insufficient_credits", StatusCode::PAYMENT_REQUIRED);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorKind {
    code: &'static str,
    status: StatusCode,
}

impl ErrorKind {
    pub const fn new(code: &'static str, status: StatusCode) -> Self {
        Self { code, status }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Raise this kind without a detail message
    pub fn error(self) -> Error {
        Error::Business {
            kind: self,
            detail: None,
        }
    }

    /// Raise this kind with a human-readable detail message
    pub fn with_detail(self, detail: impl Into<String>) -> Error {
        Error::Business {
            kind: self,
            detail: Some(detail.into()),
        }
    }
}

fn suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {}", detail),
        None => String::new(),
    }
}

/// Normalized failure type for the whole request pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed token{}", suffix(.0))]
    MalformedToken(Option<String>),

    #[error("Unknown or inactive public key{}", suffix(.0))]
    UnknownKey(Option<String>),

    #[error("Signature verification failed{}", suffix(.0))]
    Signature(Option<String>),

    #[error("Nonce replayed{}", suffix(.0))]
    Replay(Option<String>),

    #[error("Token expired{}", suffix(.0))]
    Expired(Option<String>),

    #[error("Signed query does not match request{}", suffix(.0))]
    QueryMismatch(Option<String>),

    #[error("Rate limit exceeded{}", suffix(.0))]
    RateLimited(Option<String>),

    #[error("Request rejected ({status}){}", suffix(.detail))]
    Rejected {
        status: StatusCode,
        detail: Option<String>,
    },

    #[error("{}{}", .kind.code(), suffix(.detail))]
    Business {
        kind: ErrorKind,
        detail: Option<String>,
    },

    #[error("Internal error (incident {incident}): {source:#}")]
    Internal {
        #[source]
        source: anyhow::Error,
        incident: Uuid,
    },
}

impl Error {
    /// Wrap an unclassified fault, assigning it a fresh incident id
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        Error::Internal {
            source: source.into(),
            incident: Uuid::new_v4(),
        }
    }

    pub fn malformed_token(detail: impl Into<String>) -> Self {
        Error::MalformedToken(Some(detail.into()))
    }

    /// Framework-level rejection (unknown route, unreadable body, ...)
    pub fn rejected(status: StatusCode, detail: Option<String>) -> Self {
        if status.is_server_error() {
            return Error::internal(anyhow::anyhow!(
                "upstream failure: {}",
                detail.as_deref().unwrap_or(status.as_str())
            ));
        }
        Error::Rejected { status, detail }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MalformedToken(_)
            | Error::UnknownKey(_)
            | Error::Signature(_)
            | Error::Replay(_)
            | Error::Expired(_)
            | Error::QueryMismatch(_) => StatusCode::UNAUTHORIZED,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Rejected { status, .. } => *status,
            Error::Business { kind, .. } => kind.status(),
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::MalformedToken(_) => codes::MALFORMED_TOKEN,
            Error::UnknownKey(_) => codes::UNKNOWN_KEY,
            Error::Signature(_) => codes::SIGNATURE,
            Error::Replay(_) => codes::REPLAY,
            Error::Expired(_) => codes::EXPIRED,
            Error::QueryMismatch(_) => codes::QUERY_MISMATCH,
            Error::RateLimited(_) => codes::RATE_LIMITED,
            Error::Rejected { status, .. } => match *status {
                StatusCode::NOT_FOUND => codes::NOT_FOUND,
                StatusCode::METHOD_NOT_ALLOWED => codes::METHOD_NOT_ALLOWED,
                StatusCode::PAYLOAD_TOO_LARGE => codes::PAYLOAD_TOO_LARGE,
                StatusCode::UNSUPPORTED_MEDIA_TYPE => codes::UNSUPPORTED_MEDIA_TYPE,
                _ => codes::INVALID_REQUEST,
            },
            Error::Business { kind, .. } => kind.code(),
            Error::Internal { .. } => codes::INTERNAL,
        }
    }

    /// Author-supplied detail. Internal errors only expose their incident id.
    pub fn detail(&self) -> Option<String> {
        match self {
            Error::MalformedToken(detail)
            | Error::UnknownKey(detail)
            | Error::Signature(detail)
            | Error::Replay(detail)
            | Error::Expired(detail)
            | Error::QueryMismatch(detail)
            | Error::RateLimited(detail)
            | Error::Rejected { detail, .. }
            | Error::Business { detail, .. } => detail.clone(),
            Error::Internal { incident, .. } => Some(format!("incident {}", incident)),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal { .. })
    }

    pub fn incident(&self) -> Option<Uuid> {
        match self {
            Error::Internal { incident, .. } => Some(*incident),
            _ => None,
        }
    }

    /// Level used when forwarding this error to a reporting sink
    pub fn report_level(&self) -> ReportLevel {
        if self.is_internal() {
            ReportLevel::Error
        } else {
            ReportLevel::Debug
        }
    }

    /// Diagnostic rendering for debug-mode responses.
    ///
    /// Internal errors render their full cause chain (and backtrace when
    /// `RUST_LIB_BACKTRACE` is set); other variants render their debug form.
    pub fn traceback(&self) -> String {
        match self {
            Error::Internal { source, .. } => format!("{:?}", source),
            other => format!("{:?}", other),
        }
    }

    /// Serialize into the wire body; `traceback` is only ever set when asked for.
    pub fn to_body(&self, include_traceback: bool) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                detail: self.detail(),
                traceback: include_traceback.then(|| self.traceback()),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::internal(err)
    }
}

/// Wire shape of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// The error behind a rendered response, picked up by the error boundary.
#[derive(Debug, Clone)]
pub struct ErrorReport(pub Arc<Error>);

/// Render the body and status for an error without touching extensions
pub(crate) fn render(error: &Error, include_traceback: bool) -> Response {
    let status = error.status_code();
    let mut response = (status, Json(error.to_body(include_traceback))).into_response();

    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }

    response
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log internal errors with full context
        if self.is_internal() {
            tracing::error!(error = %self, "Internal server error");
        }

        let mut response = render(&self, false);
        response.extensions_mut().insert(ErrorReport(Arc::new(self)));
        response
    }
}
