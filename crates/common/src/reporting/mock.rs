//! In-memory reporting sink
//!
//! Captures forwarded events so tests can assert on what reached the sink.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ErrorEvent, ReportError, ReportingSink};

#[derive(Debug, Clone)]
struct CapturedEvent {
    event: ErrorEvent,
    verbose: bool,
}

/// Reporting sink that records events instead of sending them
#[derive(Debug, Clone, Default)]
pub struct MockReportingSink {
    captured: Arc<Mutex<Vec<CapturedEvent>>>,
    attempts: Arc<Mutex<usize>>,
    fail: bool,
}

impl MockReportingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every event
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Events accepted so far, in arrival order
    pub fn events(&self) -> Vec<ErrorEvent> {
        self.captured
            .lock()
            .map(|captured| captured.iter().map(|c| c.event.clone()).collect())
            .unwrap_or_default()
    }

    pub fn verbose_flags(&self) -> Vec<bool> {
        self.captured
            .lock()
            .map(|captured| captured.iter().map(|c| c.verbose).collect())
            .unwrap_or_default()
    }

    /// Number of delivery attempts, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|n| *n).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut captured) = self.captured.lock() {
            captured.clear();
        }
    }
}

#[async_trait]
impl ReportingSink for MockReportingSink {
    async fn report(&self, event: ErrorEvent, verbose: bool) -> Result<(), ReportError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts += 1;
        }

        if self.fail {
            return Err(ReportError::Unavailable("mock sink configured to fail".to_string()));
        }

        let mut captured = self
            .captured
            .lock()
            .map_err(|_| ReportError::Unavailable("mock sink poisoned".to_string()))?;
        captured.push(CapturedEvent { event, verbose });
        Ok(())
    }
}
