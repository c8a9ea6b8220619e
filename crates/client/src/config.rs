//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_SYNC_API_URL` - Base URL of the storefront API (e.g., `https://shop.example.com/api/`)
//!
//! ## Optional
//! - `STOREFRONT_SYNC_REFRESH_PATH` - Credential refresh endpoint (default: `/auth/refresh`)
//! - `STOREFRONT_SYNC_LOGIN_ROUTE` - Application route of the login entry point (default: `/login`)
//! - `STOREFRONT_SYNC_REFRESH_TIMEOUT_SECS` - Upper bound on one refresh call (default: 10)
//! - `STOREFRONT_SYNC_REQUEST_TIMEOUT_SECS` - Upper bound on any other request (default: 30)
//! - `STOREFRONT_SYNC_EXPIRY_BUFFER_SECS` - Refresh proactively this long before expiry (default: 60)
//! - `STOREFRONT_SYNC_ACCESS_TOKEN` - Initial bearer credential (default: none)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Sentry error sample rate (default: 1.0)

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront sync client configuration.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL every request path is resolved against
    pub api_base_url: Url,
    /// Credential lifecycle configuration
    pub auth: AuthConfig,
    /// Upper bound on a single non-refresh request
    pub request_timeout: Duration,
    /// Initial bearer credential, if the host already has one
    pub access_token: Option<SecretString>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate
    pub sentry_sample_rate: f32,
}

/// Credential refresh and redirect configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Path of the refresh endpoint, relative to the API base URL
    pub refresh_path: String,
    /// Route the host navigates to when the session is lost
    pub login_route: String,
    /// Upper bound on one refresh call; a timeout counts as refresh failure
    pub refresh_timeout: Duration,
    /// Credentials expiring within this window are refreshed before use
    pub expiry_buffer: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: "/auth/refresh".to_string(),
            login_route: "/login".to_string(),
            refresh_timeout: Duration::from_secs(10),
            expiry_buffer: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("auth", &self.auth)
            .field("request_timeout", &self.request_timeout)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sentry_dsn", &self.sentry_dsn)
            .field("sentry_environment", &self.sentry_environment)
            .field("sentry_sample_rate", &self.sentry_sample_rate)
            .finish()
    }
}

impl ClientConfig {
    /// Configuration with defaults for everything but the base URL.
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            auth: AuthConfig::default(),
            request_timeout: Duration::from_secs(30),
            access_token: None,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_base_url = parse_env::<Url>("STOREFRONT_SYNC_API_URL", None)?;
        let defaults = AuthConfig::default();

        let auth = AuthConfig {
            refresh_path: get_env_or_default("STOREFRONT_SYNC_REFRESH_PATH", &defaults.refresh_path),
            login_route: get_env_or_default("STOREFRONT_SYNC_LOGIN_ROUTE", &defaults.login_route),
            refresh_timeout: Duration::from_secs(parse_env(
                "STOREFRONT_SYNC_REFRESH_TIMEOUT_SECS",
                Some("10"),
            )?),
            expiry_buffer: Duration::from_secs(parse_env(
                "STOREFRONT_SYNC_EXPIRY_BUFFER_SECS",
                Some("60"),
            )?),
        };

        if auth.refresh_timeout.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "STOREFRONT_SYNC_REFRESH_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            api_base_url,
            auth,
            request_timeout: Duration::from_secs(parse_env(
                "STOREFRONT_SYNC_REQUEST_TIMEOUT_SECS",
                Some("30"),
            )?),
            access_token: get_optional_env("STOREFRONT_SYNC_ACCESS_TOKEN").map(SecretString::from),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env("SENTRY_SAMPLE_RATE", Some("1.0"))?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: Option<&str>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = match default {
        Some(default) => get_env_or_default(key, default),
        None => get_required_env(key)?,
    };
    parse_value(key, &raw)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}
