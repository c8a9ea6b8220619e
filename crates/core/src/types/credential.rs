//! Bearer credential types.
//!
//! The access credential is short-lived and held in memory only. Its token is
//! wrapped in a [`SecretString`] so it never shows up in `Debug` output or logs.

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Seconds before the real expiry at which a credential is treated as expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Short-lived bearer credential attached to outbound requests.
#[derive(Debug, Clone)]
pub struct AccessCredential {
    /// The opaque bearer token.
    token: SecretString,
    /// When the token stops being accepted, if the issuer told us.
    expires_at: Option<DateTime<Utc>>,
}

impl AccessCredential {
    /// Create a credential with unknown expiry.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at: None,
        }
    }

    /// Create a credential that expires `expires_in` seconds from now.
    ///
    /// A lifetime too large to represent as a timestamp is treated as unknown.
    #[must_use]
    pub fn with_expiry(token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at: TimeDelta::try_seconds(expires_in)
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
        }
    }

    /// When the credential expires, if known.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Check if the credential is expired (with 60s buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_within(EXPIRY_BUFFER_SECS)
    }

    /// Check if the credential will expire within the given number of seconds.
    ///
    /// Credentials without a known expiry never report as expiring. A window
    /// too large to represent covers any known expiry.
    #[must_use]
    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| {
            match TimeDelta::try_seconds(seconds)
                .and_then(|window| expires_at.checked_sub_signed(window))
            {
                Some(deadline) => Utc::now() >= deadline,
                None => seconds > 0,
            }
        })
    }

    /// Render the `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    /// Expose the raw token (for transports that need it verbatim).
    #[must_use]
    pub fn expose_token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Whether two credentials carry the same token.
    #[must_use]
    pub fn same_token(&self, other: &Self) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }
}
