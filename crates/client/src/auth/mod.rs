//! Credential lifecycle: holding, refreshing, and losing the session.
//!
//! # Architecture
//!
//! - [`CredentialHolder`] is the single in-memory cell for the bearer
//!   credential. It depends on nothing, so the refresh path deep inside the
//!   request pipeline can read and write it without an import cycle.
//! - [`RefreshCoordinator`] guarantees at most one refresh call in flight,
//!   process-wide, however many requests fail with 401 concurrently.
//! - [`SessionEvents`] lets other modules observe login, refresh, and
//!   session loss without the pipeline knowing about them.
//! - [`NavigationGuard`] turns session loss into a navigation intent the host
//!   performs, at most once, and never while already on the login route.

mod events;
mod holder;
mod navigation;
mod refresh;

pub use events::{SessionEvent, SessionEvents};
pub use holder::{CredentialHolder, CredentialStore};
pub use navigation::{NavigationGuard, NavigationIntent};
pub use refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
