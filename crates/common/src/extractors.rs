//! Custom axum extractors for restbase

use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::Error;

/// JSON extractor that validates the deserialized value automatically.
///
/// Deserialization failures keep the status axum assigns them (400, 415, 422);
/// validation failures are 400. Both surface as `request::*` errors.
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| Error::rejected(e.status(), Some(e.body_text())))?;
        value.validate().map_err(|e| {
            Error::rejected(
                StatusCode::BAD_REQUEST,
                Some(format!("Validation failed: {}", e)),
            )
        })?;
        Ok(ValidatedJson(value))
    }
}
