//! Error boundary middleware
//!
//! The single point where failures are normalized before they leave the
//! process. Handlers and pipeline steps return [`Error`]; framework rejections
//! and panics arrive as plain responses. Every one of them is re-rendered here
//! into the uniform JSON body, with `traceback` only in debug mode, and then
//! handed to the [`Reporter`].

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::{render, Error, ErrorReport};
use crate::registry::ErrorRegistry;
use crate::reporting::Reporter;

/// Longest rejection body copied into `detail`
const MAX_REJECTION_DETAIL: usize = 512;

/// Normalization policy shared by every request
#[derive(Clone)]
pub struct ErrorBoundary {
    debug: bool,
    reporter: Reporter,
    registry: Arc<ErrorRegistry>,
}

impl ErrorBoundary {
    pub fn new(debug: bool, reporter: Reporter, registry: ErrorRegistry) -> Self {
        Self {
            debug,
            reporter,
            registry: Arc::new(registry),
        }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Map an error onto the closed taxonomy.
    ///
    /// Business errors whose kind was never registered become internal errors.
    pub fn classify(&self, error: Arc<Error>) -> Arc<Error> {
        match error.as_ref() {
            Error::Business { kind, .. } if !self.registry.contains(kind) => {
                tracing::error!(code = kind.code(), "Unregistered business error code");
                Arc::new(Error::internal(anyhow::anyhow!(
                    "unregistered error code '{}' ({})",
                    kind.code(),
                    error
                )))
            }
            _ => error,
        }
    }

    /// Rewrite a response into the normalized error shape when it is a failure
    pub async fn normalize(&self, response: Response) -> Response {
        let (mut parts, body) = response.into_parts();

        let error = match parts.extensions.remove::<ErrorReport>() {
            Some(ErrorReport(error)) => error,
            None if parts.status.is_client_error() || parts.status.is_server_error() => {
                let detail = rejection_detail(body).await;
                Arc::new(Error::rejected(parts.status, detail))
            }
            None => return Response::from_parts(parts, body),
        };

        let error = self.classify(error);
        self.reporter.dispatch(&error);

        let mut normalized = render(&error, self.debug);
        let rendered: Vec<HeaderName> = normalized.headers().keys().cloned().collect();
        for (name, value) in parts.headers.iter() {
            if name == CONTENT_TYPE || name == CONTENT_LENGTH || rendered.contains(name) {
                continue;
            }
            normalized.headers_mut().append(name.clone(), value.clone());
        }
        normalized.extensions_mut().insert(ErrorReport(error));
        normalized
    }
}

async fn rejection_detail(body: Body) -> Option<String> {
    let bytes = axum::body::to_bytes(body, MAX_REJECTION_DETAIL * 4).await.ok()?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_REJECTION_DETAIL).collect())
}

/// Middleware entry point: `axum::middleware::from_fn_with_state(boundary, error_boundary)`
pub async fn error_boundary(
    State(boundary): State<ErrorBoundary>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    boundary.normalize(response).await
}

/// Panic handler for `tower_http::catch_panic::CatchPanicLayer::custom`
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    Error::internal(anyhow::anyhow!("handler panicked: {}", message)).into_response()
}
