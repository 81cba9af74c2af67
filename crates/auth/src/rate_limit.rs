//! Fixed-window rate limiting
//!
//! Each caller gets `max_requests` per window. Authenticated requests are
//! keyed by public key, anonymous ones by client address; requests with
//! neither pass through. Counters live in process, so the limit applies per
//! server instance.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use restbase_common::{Error, RateLimitConfig};

use crate::pipeline::{PipelineStep, RequestContext};

/// Expired windows are swept once the table grows past this many keys
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug)]
struct Window {
    remaining: u32,
    resets_at: Instant,
}

/// Pipeline step limiting requests per caller; runs after authentication
#[derive(Debug)]
pub struct RateLimit {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Take one request from `key`'s window. Returns the wait until the
    /// window resets when it is exhausted.
    pub fn try_acquire(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| w.resets_at > now);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            remaining: self.max_requests,
            resets_at: now + self.window,
        });

        if window.resets_at <= now {
            window.remaining = self.max_requests;
            window.resets_at = now + self.window;
        }

        if window.remaining == 0 {
            return Err(window.resets_at.saturating_duration_since(now));
        }

        window.remaining -= 1;
        Ok(())
    }

    fn key_for(ctx: &RequestContext) -> Option<String> {
        match ctx.auth() {
            Some(auth) => Some(format!("token:{}", auth.public_key())),
            None => ctx.client_ip().map(|ip| format!("ip:{}", ip)),
        }
    }
}

#[async_trait]
impl PipelineStep for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let Some(key) = Self::key_for(ctx) else {
            return Ok(());
        };

        self.try_acquire(&key, Instant::now()).map_err(|retry_after| {
            tracing::info!(key = %key, retry_after_secs = retry_after.as_secs(), "Rate limit exceeded");
            Error::RateLimited(Some(format!(
                "Retry after {} seconds",
                retry_after.as_secs().max(1)
            )))
        })
    }
}
