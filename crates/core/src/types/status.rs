//! Lifecycle status of an optimistic mutation.

use serde::{Deserialize, Serialize};

/// Where an optimistic mutation is in its lifecycle.
///
/// ```text
/// Pending -> Confirmed    (server accepted; cache shows server truth)
/// Pending -> RolledBack   (write failed; optimistic edit discarded)
/// Pending -> Resynced     (target gone server-side; collection refetched)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Optimistic edit applied, network write in flight.
    Pending,
    /// Network write succeeded.
    Confirmed,
    /// Network write failed and the edit was discarded.
    RolledBack,
    /// Target entity no longer exists server-side; the collection is resyncing.
    Resynced,
}

impl MutationStatus {
    /// Whether the mutation has reached a terminal state.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}
