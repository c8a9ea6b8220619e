//! Authenticated request pipeline.
//!
//! Every outbound call goes through [`RequestPipeline::send`], which attaches
//! the current credential, and on a 401 waits for the single-flight refresh
//! and replays the request exactly once with the new credential.
//!
//! # Example
//!
//! ```rust,ignore
//! use storefront_sync::pipeline::{ApiRequest, RequestPipeline};
//!
//! let pipeline = RequestPipeline::from_config(&config)?;
//! let cart: CartBody = pipeline.send_json(ApiRequest::get("/cart")).await?;
//! ```

mod executor;
mod request;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use storefront_sync_core::{AccessCredential, UserProfile};
use tokio::sync::broadcast;
use tracing::instrument;

pub use executor::{HttpExecutor, ReqwestExecutor};
pub use request::{ApiRequest, ApiResponse};

use crate::auth::{
    CredentialHolder, CredentialStore, NavigationGuard, RefreshCoordinator, RefreshOutcome,
    SessionEvent, SessionEvents,
};
use crate::config::ClientConfig;
use crate::error::{ApiError, Result, TransportError};

/// Shared handle to the request pipeline. Cheap to clone.
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<RequestPipelineInner>,
}

struct RequestPipelineInner {
    executor: Arc<dyn HttpExecutor>,
    credentials: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
    events: SessionEvents,
    navigation: Arc<NavigationGuard>,
    expiry_buffer_secs: i64,
}

impl RequestPipeline {
    /// Build a pipeline over the given transport.
    ///
    /// Seeds the credential holder with `config.access_token` when present.
    #[must_use]
    pub fn new(config: &ClientConfig, executor: Arc<dyn HttpExecutor>) -> Self {
        use secrecy::ExposeSecret;

        let holder = match &config.access_token {
            Some(token) => CredentialHolder::with_credential(AccessCredential::new(
                token.expose_secret().to_string(),
            )),
            None => CredentialHolder::new(),
        };

        Self::with_parts(config, executor, Arc::new(holder))
    }

    /// Build a pipeline with an injected credential store.
    #[must_use]
    pub fn with_parts(
        config: &ClientConfig,
        executor: Arc<dyn HttpExecutor>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let events = SessionEvents::new();
        let navigation = Arc::new(NavigationGuard::new(config.auth.login_route.clone()));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&executor),
            Arc::clone(&credentials),
            events.clone(),
            Arc::clone(&navigation),
            &config.auth,
        );

        Self {
            inner: Arc::new(RequestPipelineInner {
                executor,
                credentials,
                coordinator,
                events,
                navigation,
                expiry_buffer_secs: i64::try_from(config.auth.expiry_buffer.as_secs())
                    .unwrap_or(i64::MAX),
            }),
        }
    }

    /// Build a pipeline backed by `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> std::result::Result<Self, TransportError> {
        let executor = ReqwestExecutor::new(config)?;
        Ok(Self::new(config, Arc::new(executor)))
    }

    /// Send a request, refreshing and replaying once on 401.
    ///
    /// # Errors
    ///
    /// - `ApiError::AuthInvalid` if the session could not be recovered. The
    ///   first waiter of a failed refresh cycle carries the login redirect.
    /// - Any other `ApiError` mapped from the final response status or transport failure.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let inner = &self.inner;
        let mut retried = false;

        // Refresh up front rather than spending a round trip on a certain 401
        if request.with_credentials
            && inner
                .credentials
                .get()
                .is_some_and(|c| c.expires_within(inner.expiry_buffer_secs))
        {
            tracing::debug!("Credential expiring soon, refreshing before send");
            retried = true;
            match inner.coordinator.refresh().await {
                RefreshOutcome::Failed(failure) => {
                    return Err(ApiError::AuthInvalid {
                        navigation: failure.take_navigation(),
                    });
                }
                RefreshOutcome::Refreshed(_) | RefreshOutcome::Superseded => {}
            }
        }

        loop {
            let credential = if request.with_credentials {
                inner.credentials.get()
            } else {
                None
            };

            let response = inner
                .executor
                .execute(&request, credential.as_ref())
                .await?;

            if response.status != reqwest::StatusCode::UNAUTHORIZED || !request.with_credentials {
                return response.error_for_status();
            }

            if retried {
                tracing::warn!("Replayed request rejected again, giving up");
                return Err(ApiError::auth_invalid());
            }
            retried = true;

            // A refresh that settled while this request was on the wire already
            // produced a newer credential; replay with it instead of refreshing again
            let current = inner.credentials.get();
            if let (Some(used), Some(current)) = (&credential, &current)
                && !used.same_token(current)
            {
                tracing::debug!("Credential changed in flight, replaying");
                continue;
            }

            match inner.coordinator.refresh().await {
                RefreshOutcome::Refreshed(_) => {
                    tracing::debug!("Replaying after refresh");
                }
                RefreshOutcome::Superseded => {
                    if !inner.credentials.is_present() {
                        return Err(ApiError::auth_invalid());
                    }
                }
                RefreshOutcome::Failed(failure) => {
                    return Err(ApiError::AuthInvalid {
                        navigation: failure.take_navigation(),
                    });
                }
            }
        }
    }

    /// Send a request and deserialize the response body.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::send`], or `ApiError::Decode` if the
    /// body has the wrong shape.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.send(request).await?.json()
    }

    /// Install the credential issued by an explicit login.
    ///
    /// Any refresh still in flight settles without overwriting it.
    #[instrument(skip(self, credential, profile))]
    pub fn login(&self, credential: AccessCredential, profile: Option<UserProfile>) {
        self.inner.coordinator.replace_session(Some(credential));
        tracing::info!(
            customer_id = profile.as_ref().map(|p| p.id.as_str()),
            "Session started"
        );
        self.inner.events.publish(SessionEvent::LoggedIn { profile });
    }

    /// Drop the credential after an explicit logout.
    #[instrument(skip(self))]
    pub fn logout(&self) {
        self.inner.coordinator.replace_session(None);
        tracing::info!("Session ended by logout");
        self.inner.events.publish(SessionEvent::LoggedOut);
    }

    /// Whether a credential is currently held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.credentials.is_present()
    }

    /// The credential store behind this pipeline.
    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    /// Subscribe to session lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The guard the host reports its current route to.
    #[must_use]
    pub fn navigation(&self) -> &NavigationGuard {
        &self.inner.navigation
    }

    /// The refresh coordinator shared by every request.
    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("authenticated", &self.is_authenticated())
            .field("login_route", &self.inner.navigation.login_route())
            .finish_non_exhaustive()
    }
}
