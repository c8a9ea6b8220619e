//! Unified error handling with Sentry integration.
//!
//! Every request and mutation resolves to an [`ApiError`]. Errors the
//! synchronization protocol knows how to recover from (rollback, resync,
//! manual retry) are handled where they occur; only session loss and
//! unrecognized failures reach [`report_unhandled`], which captures them to
//! Sentry before the host shows a forced logout or a generic message.

use thiserror::Error;

use crate::auth::NavigationIntent;

/// Error surfaced by the request pipeline and the cache synchronizer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the credential. Triggers a refresh inside the
    /// pipeline; callers only see it for requests sent without interception.
    #[error("Access credential expired")]
    AuthExpired,

    /// The session could not be recovered (refresh failed, timed out, or the
    /// replayed request was rejected again). Terminal for the session.
    ///
    /// At most one waiter per refresh cycle carries a navigation intent.
    #[error("Session is no longer authenticated")]
    AuthInvalid {
        /// Where the host should send the user, if it should navigate at all.
        navigation: Option<NavigationIntent>,
    },

    /// The target entity no longer exists server-side.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server refused the write (e.g., stock exhausted).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transport failure; safe to retry manually.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete in time; safe to retry manually.
    #[error("Request timed out")]
    Timeout,

    /// Rate limited by the server.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Rejected locally before any network or cache effect.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The response body did not match the expected shape.
    #[error("JSON parse error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any other non-success response.
    #[error("HTTP {status}: {message}")]
    Unknown {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },
}

/// Coarse error category the UI maps to user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    NotFound,
    Conflict,
    Network,
    Unknown,
}

impl ApiError {
    /// Category of this error for the UI.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthExpired | Self::AuthInvalid { .. } | Self::PreconditionFailed(_) => {
                ErrorKind::Unauthenticated
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Network(_) | Self::Timeout | Self::RateLimited(_) => ErrorKind::Network,
            Self::Decode(_) | Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::RateLimited(_)
        )
    }

    /// Whether this error must reach the global handler.
    #[must_use]
    pub const fn is_unhandled(&self) -> bool {
        matches!(
            self,
            Self::AuthInvalid { .. } | Self::Decode(_) | Self::Unknown { .. }
        )
    }

    /// The navigation intent carried by a session-loss error, if any.
    #[must_use]
    pub const fn navigation(&self) -> Option<&NavigationIntent> {
        match self {
            Self::AuthInvalid { navigation } => navigation.as_ref(),
            _ => None,
        }
    }

    /// Session loss without a navigation intent.
    #[must_use]
    pub const fn auth_invalid() -> Self {
        Self::AuthInvalid { navigation: None }
    }
}

/// Failure of the raw HTTP transport, before any status code exists.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// Connection, TLS, or body transfer failed.
    #[error("transport failure: {0}")]
    Io(String),

    /// The request could not be built (bad URL, unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            TransportError::Io(message) | TransportError::InvalidRequest(message) => {
                Self::Network(message)
            }
        }
    }
}

/// Result type alias for `ApiError`.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Global handler for errors the protocol cannot recover locally.
///
/// Captures session loss and unrecognized errors to Sentry. Recoverable
/// errors are left to the caller and only logged at debug level.
pub fn report_unhandled(err: &ApiError) {
    if !err.is_unhandled() {
        tracing::debug!(error = %err, "Recoverable error surfaced to caller");
        return;
    }

    let event_id = sentry::capture_error(err);
    tracing::error!(
        error = %err,
        sentry_event_id = %event_id,
        "Unhandled storefront sync error"
    );
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Optimistic add", Some(&[("variant_id", "v-1")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
