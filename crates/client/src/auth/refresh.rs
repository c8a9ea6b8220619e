//! Single-flight credential refresh.
//!
//! However many requests fail with 401 at the same time, exactly one refresh
//! call is made. The first failing request starts it; every later one attaches
//! to the same shared handle. The handle is released the moment the refresh
//! settles, so a 401 arriving after that starts a fresh cycle instead of
//! reusing a stale result.
//!
//! ```text
//!            refresh()                       refresh()
//!   req A ───────┬──────────────┐   req B ──────┐
//!                ▼              │               │ (slot occupied: attach)
//!         slot empty: spawn     │               │
//!         cycle N ──► POST /auth/refresh        │
//!                │   (no interception)          │
//!                ▼                              │
//!         settle: holder updated / cleared      │
//!                 slot released                 │
//!                ▼                              ▼
//!         A replays / fails              B replays / fails
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Deserialize;
use storefront_sync_core::{AccessCredential, UserProfile};
use tracing::instrument;

use super::{CredentialStore, NavigationGuard, NavigationIntent, SessionEvent, SessionEvents};
use crate::config::AuthConfig;
use crate::pipeline::{ApiRequest, HttpExecutor};

type RefreshHandle = Shared<BoxFuture<'static, RefreshOutcome>>;

/// How a refresh cycle ended, as seen by every request that waited on it.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// A new credential is in the holder.
    Refreshed(AccessCredential),
    /// An explicit login or logout happened while the refresh was in flight;
    /// its result was discarded and the holder left as the session change set it.
    Superseded,
    /// The refresh failed or timed out; the holder was cleared.
    Failed(Arc<RefreshFailure>),
}

/// Details of a failed refresh cycle, shared by all of its waiters.
#[derive(Debug)]
pub struct RefreshFailure {
    reason: String,
    timed_out: bool,
    navigation: Mutex<Option<NavigationIntent>>,
}

impl RefreshFailure {
    fn new(reason: impl Into<String>, timed_out: bool, navigation: Option<NavigationIntent>) -> Self {
        Self {
            reason: reason.into(),
            timed_out,
            navigation: Mutex::new(navigation),
        }
    }

    /// Why the refresh failed.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Whether the refresh call exceeded its timeout.
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Take the login redirect of this cycle. Only the first caller gets it.
    pub fn take_navigation(&self) -> Option<NavigationIntent> {
        self.navigation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Body returned by the refresh endpoint.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    user: Option<UserProfile>,
}

impl RefreshResponse {
    fn credential(&self) -> AccessCredential {
        match self.expires_in {
            Some(expires_in) => AccessCredential::with_expiry(self.access_token.clone(), expires_in),
            None => AccessCredential::new(self.access_token.clone()),
        }
    }
}

struct InFlight {
    cycle: u64,
    handle: RefreshHandle,
}

/// Coordinates refresh cycles so at most one refresh call is outstanding.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<RefreshCoordinatorInner>,
}

struct RefreshCoordinatorInner {
    executor: Arc<dyn HttpExecutor>,
    credentials: Arc<dyn CredentialStore>,
    events: SessionEvents,
    navigation: Arc<NavigationGuard>,
    refresh_path: String,
    timeout: Duration,
    slot: Mutex<Option<InFlight>>,
    /// Session generation; bumped by explicit login/logout. Held while a
    /// settling refresh writes the holder so the two never interleave.
    session: Mutex<u64>,
    cycles: AtomicU64,
}

impl RefreshCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        executor: Arc<dyn HttpExecutor>,
        credentials: Arc<dyn CredentialStore>,
        events: SessionEvents,
        navigation: Arc<NavigationGuard>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RefreshCoordinatorInner {
                executor,
                credentials,
                events,
                navigation,
                refresh_path: config.refresh_path.clone(),
                timeout: config.refresh_timeout,
                slot: Mutex::new(None),
                session: Mutex::new(0),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    /// Wait for a refresh, starting one only if none is in flight.
    ///
    /// Must be called from within a tokio runtime: the refresh call runs as
    /// its own task so it settles even if every waiter is dropped.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.handle().await
    }

    /// Whether a refresh call is currently outstanding.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_slot().is_some()
    }

    /// Number of refresh cycles started so far.
    #[must_use]
    pub fn cycles_started(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    /// Replace the session after an explicit login (`Some`) or logout (`None`).
    ///
    /// Any refresh still in flight settles without touching the holder.
    pub fn replace_session(&self, credential: Option<AccessCredential>) {
        let mut generation = self.inner.lock_session();
        *generation += 1;
        self.inner.credentials.set(credential);
    }

    fn handle(&self) -> RefreshHandle {
        let mut slot = self.inner.lock_slot();

        if let Some(in_flight) = slot.as_ref() {
            tracing::debug!(cycle = in_flight.cycle, "Joining in-flight refresh");
            return in_flight.handle.clone();
        }

        let cycle = self.inner.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = *self.inner.lock_session();

        let task = tokio::spawn(Arc::clone(&self.inner).run_cycle(cycle, generation));

        let inner = Arc::clone(&self.inner);
        let handle = async move {
            match task.await {
                Ok(outcome) => outcome,
                // The task never reached its own settle
                Err(e) => inner.finish(
                    cycle,
                    generation,
                    Err((format!("refresh task aborted: {e}"), false)),
                ),
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            cycle,
            handle: handle.clone(),
        });
        handle
    }
}

impl RefreshCoordinatorInner {
    #[instrument(skip(self), fields(refresh_path = %self.refresh_path))]
    async fn run_cycle(self: Arc<Self>, cycle: u64, generation: u64) -> RefreshOutcome {
        tracing::info!("Refreshing access credential");

        let result = match tokio::time::timeout(self.timeout, self.request_refresh()).await {
            Ok(result) => result.map_err(|reason| (reason, false)),
            Err(_) => Err((
                format!("refresh timed out after {:?}", self.timeout),
                true,
            )),
        };

        self.finish(cycle, generation, result)
    }

    /// Settle cycle `cycle` unless the session changed since it started, then
    /// release the slot before any waiter observes the outcome.
    fn finish(
        &self,
        cycle: u64,
        generation: u64,
        result: Result<RefreshResponse, (String, bool)>,
    ) -> RefreshOutcome {
        let outcome = {
            let current = self.lock_session();
            if *current == generation {
                self.settle(result)
            } else {
                tracing::info!("Session changed during refresh, discarding result");
                RefreshOutcome::Superseded
            }
        };

        self.release(cycle);
        outcome
    }

    async fn request_refresh(&self) -> Result<RefreshResponse, String> {
        let request = ApiRequest::post(self.refresh_path.clone()).without_credentials();

        let response = self
            .executor
            .execute(&request, None)
            .await
            .map_err(|e| e.to_string())?;

        if !response.is_success() {
            return Err(format!(
                "refresh rejected: HTTP {}: {}",
                response.status,
                response.error_message()
            ));
        }

        let body: RefreshResponse = response.json().map_err(|e| e.to_string())?;
        if body.access_token.is_empty() {
            return Err("refresh returned an empty access token".to_string());
        }
        Ok(body)
    }

    /// Apply a refresh result to the holder. Caller holds the session lock.
    fn settle(&self, result: Result<RefreshResponse, (String, bool)>) -> RefreshOutcome {
        match result {
            Ok(response) => {
                let credential = response.credential();
                self.credentials.set(Some(credential.clone()));
                tracing::info!("Access credential refreshed");
                self.events.publish(SessionEvent::Refreshed {
                    profile: response.user,
                });
                RefreshOutcome::Refreshed(credential)
            }
            Err((reason, timed_out)) => {
                self.credentials.clear();
                let navigation = self.navigation.claim_login_redirect();
                tracing::warn!(
                    reason = %reason,
                    timed_out,
                    redirect = navigation.is_some(),
                    "Credential refresh failed, session ended"
                );
                self.events.publish(SessionEvent::Expired {
                    navigation: navigation.clone(),
                });
                RefreshOutcome::Failed(Arc::new(RefreshFailure::new(
                    reason, timed_out, navigation,
                )))
            }
        }
    }

    fn release(&self, cycle: u64) {
        let mut slot = self.lock_slot();
        if slot.as_ref().is_some_and(|in_flight| in_flight.cycle == cycle) {
            *slot = None;
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_session(&self) -> MutexGuard<'_, u64> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::auth::CredentialHolder;
    use crate::testing::ScriptedExecutor;

    struct Fixture {
        executor: Arc<ScriptedExecutor>,
        holder: Arc<CredentialHolder>,
        navigation: Arc<NavigationGuard>,
        events: SessionEvents,
        coordinator: RefreshCoordinator,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let executor = Arc::new(ScriptedExecutor::new());
        let holder = Arc::new(CredentialHolder::with_credential(AccessCredential::new(
            "stale",
        )));
        let navigation = Arc::new(NavigationGuard::new("/login"));
        navigation.record_route("/cart");
        let events = SessionEvents::new();
        let config = AuthConfig {
            refresh_timeout: timeout,
            ..AuthConfig::default()
        };
        let coordinator = RefreshCoordinator::new(
            executor.clone(),
            holder.clone(),
            events.clone(),
            navigation.clone(),
            &config,
        );
        Fixture {
            executor,
            holder,
            navigation,
            events,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let f = fixture(Duration::from_secs(5));
        let gate = f.executor.respond_when(Method::POST, "/auth/refresh");

        let first = tokio::spawn({
            let coordinator = f.coordinator.clone();
            async move { coordinator.refresh().await }
        });
        let second = tokio::spawn({
            let coordinator = f.coordinator.clone();
            async move { coordinator.refresh().await }
        });

        f.executor.wait_for_calls(Method::POST, "/auth/refresh", 1).await;
        tokio::task::yield_now().await;
        assert!(f.coordinator.is_refreshing());

        gate.respond(StatusCode::OK, Some(json!({"access_token": "fresh"})));

        for waiter in [first, second] {
            let outcome = waiter.await.expect("join");
            assert!(matches!(outcome, RefreshOutcome::Refreshed(ref c) if c.expose_token() == "fresh"));
        }
        assert_eq!(f.executor.count(Method::POST, "/auth/refresh"), 1);
        assert_eq!(f.coordinator.cycles_started(), 1);
        assert!(!f.coordinator.is_refreshing());
        assert_eq!(
            f.holder.get().map(|c| c.expose_token().to_string()),
            Some("fresh".to_string())
        );
    }

    #[tokio::test]
    async fn test_refresh_is_sent_without_credential() {
        let f = fixture(Duration::from_secs(5));
        f.executor.respond(
            Method::POST,
            "/auth/refresh",
            StatusCode::OK,
            Some(json!({"access_token": "fresh", "expires_in": 900})),
        );

        let outcome = f.coordinator.refresh().await;
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));

        let calls = f.executor.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].token.is_none());
    }

    #[tokio::test]
    async fn test_failure_clears_holder_and_claims_redirect_once() {
        let f = fixture(Duration::from_secs(5));
        let mut events = f.events.subscribe();
        f.executor
            .respond(Method::POST, "/auth/refresh", StatusCode::UNAUTHORIZED, None);

        let RefreshOutcome::Failed(failure) = f.coordinator.refresh().await else {
            panic!("expected failure");
        };

        assert!(f.holder.get().is_none());
        assert!(!failure.timed_out());
        let intent = failure.take_navigation().expect("redirect");
        assert_eq!(intent.target, "/login");
        assert_eq!(intent.return_to.as_deref(), Some("/cart"));
        assert!(failure.take_navigation().is_none());

        assert!(matches!(
            events.recv().await.expect("event"),
            SessionEvent::Expired { navigation: Some(_) }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let f = fixture(Duration::from_secs(2));
        f.executor.hang(Method::POST, "/auth/refresh");

        let RefreshOutcome::Failed(failure) = f.coordinator.refresh().await else {
            panic!("expected failure");
        };

        assert!(failure.timed_out());
        assert!(f.holder.get().is_none());
        assert!(!f.coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_next_cycle_starts_after_settle() {
        let f = fixture(Duration::from_secs(5));
        f.executor.respond(
            Method::POST,
            "/auth/refresh",
            StatusCode::OK,
            Some(json!({"access_token": "one"})),
        );
        f.executor.respond(
            Method::POST,
            "/auth/refresh",
            StatusCode::OK,
            Some(json!({"access_token": "two"})),
        );

        assert!(matches!(f.coordinator.refresh().await, RefreshOutcome::Refreshed(_)));
        let RefreshOutcome::Refreshed(second) = f.coordinator.refresh().await else {
            panic!("expected second refresh");
        };

        assert_eq!(second.expose_token(), "two");
        assert_eq!(f.coordinator.cycles_started(), 2);
    }

    #[tokio::test]
    async fn test_oversized_lifetime_still_refreshes() {
        let f = fixture(Duration::from_secs(5));
        f.executor.respond(
            Method::POST,
            "/auth/refresh",
            StatusCode::OK,
            Some(json!({"access_token": "fresh", "expires_in": 10_000_000_000_000_i64})),
        );

        let RefreshOutcome::Refreshed(credential) = f.coordinator.refresh().await else {
            panic!("expected refresh");
        };

        assert_eq!(credential.expose_token(), "fresh");
        assert!(credential.expires_at().is_none());
        assert!(f.holder.get().is_some());
    }

    struct PanickingExecutor;

    #[async_trait::async_trait]
    impl HttpExecutor for PanickingExecutor {
        async fn execute(
            &self,
            _request: &ApiRequest,
            _credential: Option<&AccessCredential>,
        ) -> Result<crate::pipeline::ApiResponse, crate::error::TransportError> {
            panic!("transport blew up");
        }
    }

    #[tokio::test]
    async fn test_aborted_refresh_follows_failure_path() {
        let holder = Arc::new(CredentialHolder::with_credential(AccessCredential::new(
            "stale",
        )));
        let navigation = Arc::new(NavigationGuard::new("/login"));
        navigation.record_route("/cart");
        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        let coordinator = RefreshCoordinator::new(
            Arc::new(PanickingExecutor),
            holder.clone(),
            events,
            navigation,
            &AuthConfig::default(),
        );

        let RefreshOutcome::Failed(failure) = coordinator.refresh().await else {
            panic!("expected failure");
        };

        assert!(holder.get().is_none());
        assert!(!coordinator.is_refreshing());
        let intent = failure.take_navigation().expect("redirect");
        assert_eq!(intent.return_to.as_deref(), Some("/cart"));
        assert!(matches!(
            rx.recv().await.expect("event"),
            SessionEvent::Expired { navigation: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_logout_mid_refresh_settles_harmlessly() {
        let f = fixture(Duration::from_secs(5));
        let gate = f.executor.respond_when(Method::POST, "/auth/refresh");

        let waiter = tokio::spawn({
            let coordinator = f.coordinator.clone();
            async move { coordinator.refresh().await }
        });
        f.executor.wait_for_calls(Method::POST, "/auth/refresh", 1).await;

        f.coordinator.replace_session(None);
        gate.respond(StatusCode::OK, Some(json!({"access_token": "late"})));

        let outcome = waiter.await.expect("join");
        assert!(matches!(outcome, RefreshOutcome::Superseded));
        assert!(f.holder.get().is_none());
        assert!(f.navigation.claim_login_redirect().is_some());
    }
}
