//! Configuration management following 12-factor app principles
//!
//! All configuration is loaded from environment variables once at process
//! start and passed explicitly to the components that need it.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_TOKEN_MODEL: &str = "auth_tokens";
const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
const DEFAULT_IP_HEADERS: &str = "cf-connecting-ip,x-forwarded-for";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Error forwarding settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Destination for forwarded errors; reporting is off when unset
    pub endpoint: Option<String>,
    /// Forward handled errors too, not just internal ones
    pub verbose: bool,
}

/// Fixed-window request limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Database connection URL
    pub database_url: Option<String>,
    /// Pool size. Every in-flight authenticated request holds one
    /// connection until its nonce commits, so this bounds concurrency.
    pub database_max_connections: u32,
    /// How long a request waits for a pooled connection
    pub database_acquire_timeout_secs: u64,

    /// Include `traceback` in error responses
    pub debug: bool,

    /// Error forwarding
    pub reporting: ReportingConfig,

    /// Table backing token lookups (the authentication model)
    pub auth_token_model: String,
    /// Maximum accepted age of a token's `iat`, when set
    pub token_max_age_secs: Option<u64>,
    /// Lifetime given to newly issued tokens
    pub token_default_ttl_secs: u64,

    /// Maximum buffered request body size
    pub request_body_limit: usize,
    pub rate_limit: Option<RateLimitConfig>,
    /// Headers consulted, in order, for the client address
    pub ip_headers: Vec<String>,

    /// Runtime configuration
    pub log_format: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            database_acquire_timeout_secs: DEFAULT_DB_ACQUIRE_TIMEOUT_SECS,
            debug: false,
            reporting: ReportingConfig::default(),
            auth_token_model: DEFAULT_TOKEN_MODEL.to_string(),
            token_max_age_secs: None,
            token_default_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            request_body_limit: DEFAULT_BODY_LIMIT,
            rate_limit: None,
            ip_headers: split_list(DEFAULT_IP_HEADERS),
            log_format: "pretty".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let rate_limit = match (
            parse_opt::<u32>(&get, "RATE_LIMIT_MAX")?,
            parse_opt::<u64>(&get, "RATE_LIMIT_WINDOW_SECS")?,
        ) {
            (Some(max_requests), Some(window_secs)) if max_requests > 0 && window_secs > 0 => {
                Some(RateLimitConfig {
                    max_requests,
                    window_secs,
                })
            }
            _ => None,
        };

        let database_max_connections = parse_opt::<u32>(&get, "DATABASE_MAX_CONNECTIONS")?
            .unwrap_or(defaults.database_max_connections);
        if database_max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }

        let config = Self {
            database_url: get("DATABASE_URL"),
            database_max_connections,
            database_acquire_timeout_secs: parse_opt(&get, "DATABASE_ACQUIRE_TIMEOUT_SECS")?
                .unwrap_or(defaults.database_acquire_timeout_secs),
            debug: parse_bool(&get, "DEBUG")?.unwrap_or(false),
            reporting: ReportingConfig {
                endpoint: get("ERROR_REPORTING_ENDPOINT"),
                verbose: parse_bool(&get, "ERROR_REPORTING_VERBOSE")?.unwrap_or(false),
            },
            auth_token_model: get("AUTH_TOKEN_MODEL").unwrap_or(defaults.auth_token_model),
            token_max_age_secs: parse_opt(&get, "TOKEN_MAX_AGE_SECS")?,
            token_default_ttl_secs: parse_opt(&get, "TOKEN_DEFAULT_TTL_SECS")?
                .unwrap_or(defaults.token_default_ttl_secs),
            request_body_limit: parse_opt(&get, "REQUEST_BODY_LIMIT")?
                .unwrap_or(defaults.request_body_limit),
            rate_limit,
            ip_headers: get("IP_HEADERS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.ip_headers),
            log_format: get("LOG_FORMAT").unwrap_or(defaults.log_format),
            port: parse_opt(&get, "PORT")?.unwrap_or(defaults.port),
        };

        Ok(config)
    }

    /// Database URL, required by the server binary
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_opt<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    get(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: "expected a boolean".to_string(),
            }),
        })
        .transpose()
}
