//! Bearer-token authentication for restbase
//!
//! Provides the token codec, the token store and its atomic nonce advance,
//! the request pipeline with its authentication, query binding and rate
//! limiting steps, and axum extractors for the bound [`AuthContext`].

mod backend;
mod claims;
pub mod codec;
mod config;
mod context;
mod credentials;
mod error;
mod extractors;
mod nonce;
pub mod pipeline;
mod principal;
mod query;
mod rate_limit;
pub mod store;
mod types;

pub use backend::{AuthBackend, PendingAuth};
pub use claims::{TokenClaims, TokenHeader, ALGORITHM, TOKEN_TYPE};
pub use codec::UnverifiedToken;
pub use config::AuthConfig;
pub use context::AuthContext;
pub use credentials::Credentials;
pub use error::StoreError;
pub use extractors::{AuthUser, MaybeAuthUser};
pub use nonce::NonceTracker;
pub use pipeline::{run_pipeline, PendingNonce, Pipeline, PipelineStep, RequestContext};
pub use principal::PrincipalStore;
pub use query::QueryBinding;
pub use rate_limit::RateLimit;
pub use store::{AdvanceOutcome, MemoryTokenStore, NonceLease, PgTokenStore, TokenStore};
pub use types::{IssuedToken, Principal, TokenRecord, TokenView, INITIAL_NONCE};
