//! Raw HTTP transport.
//!
//! An [`HttpExecutor`] sends exactly what it is given and reports exactly what
//! came back. It knows nothing about refresh or retries, which is what makes
//! it the "send without interception" path used by the refresh call itself.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use storefront_sync_core::AccessCredential;
use tracing::instrument;
use url::Url;

use super::request::{ApiRequest, ApiResponse};
use crate::config::ClientConfig;
use crate::error::TransportError;

/// Sends one request and returns the response, whatever its status.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Execute `request`, attaching `credential` as a bearer token when given.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` only when no HTTP response was obtained.
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessCredential>,
    ) -> Result<ApiResponse, TransportError>;
}

/// [`HttpExecutor`] backed by `reqwest`.
///
/// Keeps a cookie store so the refresh endpoint sees the HTTP-only session
/// cookie set at login.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestExecutor {
    /// Create an executor from client configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidRequest` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self::with_client(client, config.api_base_url.clone()))
    }

    /// Create an executor around an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, mut base_url: Url) -> Self {
        // Url::join drops the last path segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    /// Resolve a request path against the base URL.
    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("{path}: {e}")))
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    #[instrument(skip(self, request, credential), fields(method = %request.method, path = %request.path))]
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessCredential>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.resolve(&request.path)?;

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credential) = credential {
            builder = builder.header(AUTHORIZATION, credential.bearer());
        }
        if let Some(body) = &request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            None
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        body = %text.chars().take(200).collect::<String>(),
                        "Non-JSON response body"
                    );
                    Some(serde_json::json!({ "message": text.chars().take(500).collect::<String>() }))
                }
            }
        };

        tracing::debug!(status = %status, "Response received");

        Ok(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}
