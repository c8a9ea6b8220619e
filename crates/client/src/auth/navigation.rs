//! Navigation intents produced by session loss.
//!
//! The pipeline never navigates by itself. When a refresh cycle fails it asks
//! the guard for a login redirect and hands the resulting intent back to the
//! caller; the host decides how to perform it.

use std::sync::Mutex;

/// A navigation the host application should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationIntent {
    /// Route to navigate to.
    pub target: String,
    /// Route the user was on, so the login page can send them back.
    pub return_to: Option<String>,
}

#[derive(Debug)]
struct RouteState {
    current: Option<String>,
    redirect_outstanding: bool,
}

/// Tracks the host's current route and hands out at most one outstanding
/// login redirect.
#[derive(Debug)]
pub struct NavigationGuard {
    login_route: String,
    state: Mutex<RouteState>,
}

impl NavigationGuard {
    /// Create a guard for the given login route.
    #[must_use]
    pub fn new(login_route: impl Into<String>) -> Self {
        Self {
            login_route: login_route.into(),
            state: Mutex::new(RouteState {
                current: None,
                redirect_outstanding: false,
            }),
        }
    }

    /// The login route this guard redirects to.
    #[must_use]
    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// Record that the host is now showing `route`.
    ///
    /// Any outstanding redirect is considered performed.
    pub fn record_route(&self, route: impl Into<String>) {
        let mut state = self.lock();
        state.current = Some(route.into());
        state.redirect_outstanding = false;
    }

    /// The route last recorded by the host.
    #[must_use]
    pub fn current_route(&self) -> Option<String> {
        self.lock().current.clone()
    }

    /// Claim the login redirect.
    ///
    /// Returns `None` when the host is already on the login route or a
    /// previous redirect has not been performed yet.
    pub fn claim_login_redirect(&self) -> Option<NavigationIntent> {
        let mut state = self.lock();

        if state.redirect_outstanding || self.is_login_route(state.current.as_deref()) {
            return None;
        }

        state.redirect_outstanding = true;
        Some(NavigationIntent {
            target: self.login_route.clone(),
            return_to: state.current.clone(),
        })
    }

    fn is_login_route(&self, route: Option<&str>) -> bool {
        route.is_some_and(|route| {
            let path = route.split(['?', '#']).next().unwrap_or(route);
            path == self.login_route
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouteState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claim_redirects_with_return_route() {
        let guard = NavigationGuard::new("/login");
        guard.record_route("/cart");

        let intent = guard.claim_login_redirect().expect("redirect");
        assert_eq!(intent.target, "/login");
        assert_eq!(intent.return_to.as_deref(), Some("/cart"));
    }

    #[test]
    fn test_second_claim_is_suppressed_until_route_changes() {
        let guard = NavigationGuard::new("/login");
        guard.record_route("/cart");

        assert!(guard.claim_login_redirect().is_some());
        assert!(guard.claim_login_redirect().is_none());

        guard.record_route("/products");
        assert!(guard.claim_login_redirect().is_some());
    }

    #[test]
    fn test_no_redirect_when_already_on_login() {
        let guard = NavigationGuard::new("/login");
        guard.record_route("/login?next=%2Fcart");

        assert!(guard.claim_login_redirect().is_none());
        assert!(guard.claim_login_redirect().is_none());
    }

    #[test]
    fn test_unknown_route_still_redirects() {
        let guard = NavigationGuard::new("/login");
        let intent = guard.claim_login_redirect().expect("redirect");
        assert!(intent.return_to.is_none());
    }
}
