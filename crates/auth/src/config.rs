//! Authentication configuration

use std::time::Duration;

use restbase_common::Config;

/// Allowed drift between a client's `iat` and the server clock
const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Authentication configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Table backing token lookups
    pub token_model: String,
    /// Reject tokens whose `iat` is older than this; `iat` is optional when unset
    pub max_token_age: Option<Duration>,
    /// Lifetime of newly issued tokens when the caller does not ask for one
    pub default_token_ttl: Duration,
    pub clock_skew: Duration,
}

impl AuthConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            token_model: config.auth_token_model.clone(),
            max_token_age: config.token_max_age_secs.map(Duration::from_secs),
            default_token_ttl: Duration::from_secs(config.token_default_ttl_secs),
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
