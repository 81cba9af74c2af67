//! Token store errors

use restbase_common::Error;
use thiserror::Error as ThisError;
use uuid::Uuid;

/// Failure reported by a [`TokenStore`](crate::store::TokenStore)
#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token store unavailable: {0}")]
    Unavailable(String),

    #[error("Owner {0} is unknown or inactive")]
    InactiveOwner(Uuid),

    #[error("No unique key pair after {0} attempts")]
    KeyCollision(usize),

    #[error("Random source failed: {0}")]
    Random(String),

    #[error("Invalid token model name '{0}'")]
    InvalidModel(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InactiveOwner(_) => Error::UnknownKey(Some(err.to_string())),
            other => Error::internal(other),
        }
    }
}
