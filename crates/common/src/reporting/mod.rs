//! Best-effort error reporting
//!
//! Errors normalized at the boundary can be forwarded to an external sink.
//! Forwarding runs on a detached task: the caller's response never waits on it
//! and sink failures are logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ReportingConfig;
use crate::error::Error;

pub mod mock;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Reporting transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Reporting sink rejected event with status {0}")]
    Rejected(u16),

    #[error("Reporting sink unavailable: {0}")]
    Unavailable(String),
}

/// Severity attached to a forwarded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Serializable snapshot of a normalized error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: String,
    pub status: u16,
    pub level: ReportLevel,
    pub message: String,
    pub detail: Option<String>,
    pub incident: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn from_error(error: &Error) -> Self {
        Self {
            code: error.error_code().to_string(),
            status: error.status_code().as_u16(),
            level: error.report_level(),
            message: error.to_string(),
            detail: error.detail(),
            incident: error.incident(),
            occurred_at: Utc::now(),
        }
    }
}

/// External destination for error events
#[async_trait]
pub trait ReportingSink: Send + Sync {
    /// Deliver one event. `verbose` is set when handled errors are forwarded too.
    async fn report(&self, event: ErrorEvent, verbose: bool) -> Result<(), ReportError>;
}

/// Sink that POSTs events as JSON to an HTTP endpoint
pub struct HttpReportingSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReportingSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ReportingSink for HttpReportingSink {
    #[mutants::skip] // Network I/O; exercised against a live endpoint only
    async fn report(&self, event: ErrorEvent, verbose: bool) -> Result<(), ReportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("verbose", verbose)])
            .json(&event)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ReportError::Rejected(response.status().as_u16()));
        }

        Ok(())
    }
}

/// Policy-gated dispatcher in front of an optional sink
#[derive(Clone, Default)]
pub struct Reporter {
    sink: Option<Arc<dyn ReportingSink>>,
    verbose: bool,
}

impl Reporter {
    pub fn new(sink: Arc<dyn ReportingSink>, verbose: bool) -> Self {
        Self {
            sink: Some(sink),
            verbose,
        }
    }

    /// Reporter that never forwards anything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build from configuration: no endpoint means reporting is off
    pub fn from_config(config: &ReportingConfig) -> Result<Self, ReportError> {
        match &config.endpoint {
            Some(endpoint) => {
                tracing::info!(endpoint = %endpoint, verbose = config.verbose, "Error reporting enabled");
                let sink = HttpReportingSink::new(endpoint.clone())?;
                Ok(Self::new(Arc::new(sink), config.verbose))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Internal errors are always forwarded; everything else only when verbose
    pub fn should_report(&self, error: &Error) -> bool {
        self.sink.is_some() && (error.is_internal() || self.verbose)
    }

    /// Forward on a detached task. Returns the task handle when something was sent.
    pub fn dispatch(&self, error: &Error) -> Option<JoinHandle<()>> {
        if !self.should_report(error) {
            return None;
        }

        let sink = self.sink.clone()?;
        let verbose = self.verbose;
        let event = ErrorEvent::from_error(error);

        Some(tokio::spawn(async move {
            let code = event.code.clone();
            if let Err(e) = sink.report(event, verbose).await {
                tracing::warn!(error = %e, code = %code, "Failed to forward error report");
            }
        }))
    }
}
