//! Query binding
//!
//! A token may carry a `query` claim that pins it to one request's inputs:
//! either its query string parameters (with an empty body) or its JSON body
//! (with no query parameters). A token without `query` may only be used for
//! requests carrying neither. Anything else is `auth::query_mismatch`.

use async_trait::async_trait;
use restbase_common::Error;
use serde_json::Value;

use crate::pipeline::{PipelineStep, RequestContext};

/// Pipeline step enforcing the `query` claim; runs after authentication
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBinding;

impl QueryBinding {
    pub fn new() -> Self {
        Self
    }

    /// Whether a signed query matches the request's parameters and body
    pub fn matches(signed: Option<&Value>, params: &Value, body: Option<&Value>) -> bool {
        let params_empty = params.as_object().is_some_and(|p| p.is_empty());
        // `null` and `{}` bodies carry no data
        let body = body.filter(|b| !(b.is_null() || b.as_object().is_some_and(|o| o.is_empty())));

        match signed {
            Some(query) => {
                (body.is_none() && query == params) || (params_empty && body == Some(query))
            }
            None => params_empty && body.is_none(),
        }
    }
}

#[async_trait]
impl PipelineStep for QueryBinding {
    fn name(&self) -> &'static str {
        "query_binding"
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let Some(auth) = ctx.auth() else {
            return Ok(());
        };

        let params = Value::Object(ctx.query_params()?);
        let body = ctx.body_json();

        if Self::matches(auth.claims.bound_query(), &params, body.as_ref()) {
            Ok(())
        } else {
            tracing::debug!(public_key = %auth.public_key(), "Signed query does not match request");
            Err(Error::QueryMismatch(None))
        }
    }
}
