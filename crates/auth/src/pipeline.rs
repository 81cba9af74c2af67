//! Request pipeline
//!
//! An ordered list of [`PipelineStep`]s run against a [`RequestContext`]
//! before the handler. The first failing step short-circuits the request;
//! its error is rendered by the error boundary. The authentication step binds
//! an [`AuthContext`], which handlers read from request extensions.
//!
//! The request body is buffered (up to a limit) so steps can inspect it and
//! the handler still receives it unchanged. A nonce accepted during the
//! pipeline is committed only once the handler has produced a response.
//! Handlers that use the token store must commit it first through the
//! [`PendingNonce`] extension: the open lease holds a pooled connection and
//! the token's row lock, so a second store call could wait on either.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use restbase_common::{client_ip, Config, Error};
use serde_json::{Map, Value};

use crate::backend::PendingAuth;
use crate::context::AuthContext;
use crate::store::NonceLease;

/// Everything a pipeline step may look at or bind for one request
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    client_ip: Option<String>,
    auth: Option<AuthContext>,
    lease: Option<NonceLease>,
}

impl RequestContext {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: Option<String>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            client_ip,
            auth: None,
            lease: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.headers.get(AUTHORIZATION)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    /// Query string parameters; repeated names keep their last value
    pub fn query_params(&self) -> Result<Map<String, Value>, Error> {
        let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&self.uri)
            .map_err(|e| Error::rejected(StatusCode::BAD_REQUEST, Some(e.body_text())))?;
        Ok(params
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect())
    }

    /// Body as JSON; `None` when empty, a JSON string when not valid JSON
    pub fn body_json(&self) -> Option<Value> {
        if self.body.is_empty() {
            return None;
        }
        Some(
            serde_json::from_slice(&self.body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned())),
        )
    }

    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    /// Bind the authenticated principal. A request is authenticated at most once.
    pub fn bind_auth(&mut self, pending: PendingAuth) -> Result<(), Error> {
        if self.auth.is_some() {
            return Err(Error::internal(anyhow::anyhow!(
                "authentication context bound twice"
            )));
        }
        let (context, lease) = pending.into_parts();
        self.auth = Some(context);
        self.lease = Some(lease);
        Ok(())
    }

    fn into_binding(self) -> (Option<AuthContext>, Option<NonceLease>) {
        (self.auth, self.lease)
    }
}

/// Nonce lease awaiting commit, shared between the middleware and the handler
#[derive(Clone)]
pub struct PendingNonce(Arc<tokio::sync::Mutex<Option<NonceLease>>>);

impl PendingNonce {
    fn new(lease: NonceLease) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(Some(lease))))
    }

    /// Commit now. Later calls are no-ops.
    pub async fn commit(&self) -> Result<(), Error> {
        let Some(lease) = self.0.lock().await.take() else {
            return Ok(());
        };
        let public_key = lease.public_key().to_string();
        lease.commit().await.map_err(|e| {
            tracing::error!(error = %e, public_key = %public_key, "Failed to commit nonce");
            Error::from(e)
        })
    }

    pub async fn is_committed(&self) -> bool {
        self.0.lock().await.is_none()
    }
}

/// One stage of request processing
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), Error>;
}

/// Ordered steps plus the buffering policy they run under
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    body_limit: usize,
    ip_headers: Arc<[String]>,
}

impl Pipeline {
    pub fn new(body_limit: usize, ip_headers: Vec<String>) -> Self {
        Self {
            steps: Vec::new(),
            body_limit,
            ip_headers: ip_headers.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.request_body_limit, config.ip_headers.clone())
    }

    /// Append a step; steps run in the order they were added
    pub fn step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    pub async fn run(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        for step in &self.steps {
            step.apply(ctx).await.map_err(|e| {
                tracing::debug!(step = step.name(), code = e.error_code(), "Pipeline step rejected request");
                e
            })?;
        }
        Ok(())
    }
}

/// Middleware entry point: `axum::middleware::from_fn_with_state(pipeline, run_pipeline)`
pub async fn run_pipeline(
    State(pipeline): State<Pipeline>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let (mut parts, body) = request.into_parts();

    let body = axum::body::to_bytes(body, pipeline.body_limit)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, limit = pipeline.body_limit, "Failed to buffer request body");
            Error::rejected(
                StatusCode::PAYLOAD_TOO_LARGE,
                Some(format!(
                    "Request body exceeds {} bytes or could not be read",
                    pipeline.body_limit
                )),
            )
        })?;

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&parts.headers, &pipeline.ip_headers, peer);

    let mut ctx = RequestContext::new(
        parts.method.clone(),
        parts.uri.clone(),
        parts.headers.clone(),
        body.clone(),
        ip,
    );
    pipeline.run(&mut ctx).await?;

    let (auth, lease) = ctx.into_binding();
    if let Some(auth) = auth {
        parts.extensions.insert(auth);
    }
    let pending = lease.map(PendingNonce::new);
    if let Some(pending) = &pending {
        parts.extensions.insert(pending.clone());
    }

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    if let Some(pending) = pending {
        pending.commit().await?;
    }

    Ok(response)
}
