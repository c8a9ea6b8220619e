//! Session lifecycle events.
//!
//! Modules that care about the session (e.g., a profile view that wants the
//! refreshed user) subscribe here instead of importing the pipeline.

use storefront_sync_core::UserProfile;
use tokio::sync::broadcast;

use super::NavigationIntent;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 32;

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Explicit login stored a new credential.
    LoggedIn {
        /// Profile delivered with the credential, if any.
        profile: Option<UserProfile>,
    },
    /// A refresh cycle produced a new credential.
    Refreshed {
        /// Updated profile, if the refresh endpoint returned one.
        profile: Option<UserProfile>,
    },
    /// Explicit logout cleared the credential.
    LoggedOut,
    /// A refresh cycle failed; the credential was cleared.
    Expired {
        /// Navigation the host should perform, if any.
        navigation: Option<NavigationIntent>,
    },
}

/// Broadcast hub for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    /// Create a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        tracing::debug!(event = ?event, "Session event");
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
