//! Optimistic cache with rebase-on-settle bookkeeping.
//!
//! Each collection keeps the last authoritative server state (`base`) and the
//! ordered list of edits that have been applied optimistically but not yet
//! confirmed or rejected. What consumers see (`view`) is always `base` with
//! those edits replayed in order. Settling a mutation only ever changes
//! `base` or removes that one edit from the list, then rebuilds the view, so
//! a late failure of an earlier edit cannot erase a later one.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use storefront_sync_core::{MutationId, MutationStatus};
use tokio::sync::watch;

use super::snapshot::{CacheEntity, Edit, Snapshot};

/// Settled mutation statuses kept per collection for the UI to read.
const SETTLED_HISTORY: usize = 64;

/// Names one collection inside an [`OptimisticCache`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey(String);

impl CollectionKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Record of an optimistic edit, consumed once when its write settles.
#[derive(Debug, Clone)]
pub struct PendingMutation<V: CacheEntity> {
    pub id: MutationId,
    pub collection: CollectionKey,
    pub edit: Edit<V>,
    /// What the collection looked like just before the edit.
    pub before: Snapshot<V>,
    /// What the collection looked like just after the edit.
    pub after: Snapshot<V>,
}

/// What a consumer reads: the visible snapshot plus per-mutation state.
#[derive(Debug, Clone)]
pub struct CacheView<V: CacheEntity> {
    pub snapshot: Snapshot<V>,
    /// Bumped on every change.
    pub version: u64,
    /// Whether an authoritative snapshot has ever been applied.
    pub loaded: bool,
    /// Whether the collection is known to diverge from the server.
    pub stale: bool,
    pending: Vec<(MutationId, Option<V::Key>)>,
    settled: Vec<(MutationId, MutationStatus)>,
}

impl<V: CacheEntity> CacheView<V> {
    fn empty() -> Self {
        Self {
            snapshot: Snapshot::new(),
            version: 0,
            loaded: false,
            stale: false,
            pending: Vec::new(),
            settled: Vec::new(),
        }
    }

    /// Whether mutation `id` is still in flight.
    #[must_use]
    pub fn is_pending(&self, id: MutationId) -> bool {
        self.pending.iter().any(|(pending, _)| *pending == id)
    }

    /// Whether any in-flight mutation touches `key` (or the whole collection).
    #[must_use]
    pub fn is_key_pending(&self, key: &V::Key) -> bool {
        self.pending
            .iter()
            .any(|(_, target)| target.as_ref().is_none_or(|target| target == key))
    }

    /// Number of mutations in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Status of mutation `id`, if it is pending or settled recently.
    #[must_use]
    pub fn status_of(&self, id: MutationId) -> Option<MutationStatus> {
        if self.is_pending(id) {
            return Some(MutationStatus::Pending);
        }
        self.settled
            .iter()
            .rev()
            .find(|(settled, _)| *settled == id)
            .map(|(_, status)| *status)
    }
}

/// Read ticket; a read is applied only if no mutation began since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    epoch: u64,
}

struct PendingEdit<V: CacheEntity> {
    id: MutationId,
    edit: Edit<V>,
}

struct CollectionState<V: CacheEntity> {
    base: Snapshot<V>,
    view: Snapshot<V>,
    pending: Vec<PendingEdit<V>>,
    settled: VecDeque<(MutationId, MutationStatus)>,
    version: u64,
    epoch: u64,
    /// Epoch at which `base` was last replaced by a server snapshot.
    base_epoch: u64,
    loaded: bool,
    stale: bool,
    sender: watch::Sender<CacheView<V>>,
}

impl<V: CacheEntity> CollectionState<V> {
    fn new() -> Self {
        let (sender, _) = watch::channel(CacheView::empty());
        Self {
            base: Snapshot::new(),
            view: Snapshot::new(),
            pending: Vec::new(),
            settled: VecDeque::new(),
            version: 0,
            epoch: 0,
            base_epoch: 0,
            loaded: false,
            stale: false,
            sender,
        }
    }

    fn rebuild(&mut self) {
        self.view = self
            .pending
            .iter()
            .fold(self.base.clone(), |snapshot, pending| {
                pending.edit.apply(&snapshot)
            });
    }

    /// Remove mutation `id` from the pending list, returning whether it was there.
    fn take(&mut self, id: MutationId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| pending.id != id);
        self.pending.len() != before
    }

    fn record(&mut self, id: MutationId, status: MutationStatus) {
        if self.settled.len() == SETTLED_HISTORY {
            self.settled.pop_front();
        }
        self.settled.push_back((id, status));
    }

    fn to_view(&self) -> CacheView<V> {
        CacheView {
            snapshot: self.view.clone(),
            version: self.version,
            loaded: self.loaded,
            stale: self.stale,
            pending: self
                .pending
                .iter()
                .map(|pending| (pending.id, pending.edit.target().cloned()))
                .collect(),
            settled: self.settled.iter().copied().collect(),
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        self.sender.send_replace(self.to_view());
    }
}

/// Optimistic cache over any number of collections of `V`.
pub struct OptimisticCache<V: CacheEntity> {
    collections: Mutex<HashMap<CollectionKey, CollectionState<V>>>,
}

impl<V: CacheEntity> Default for OptimisticCache<V> {
    fn default() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: CacheEntity> OptimisticCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view of a collection.
    #[must_use]
    pub fn view(&self, key: &CollectionKey) -> CacheView<V> {
        self.with_state(key, |state| state.to_view())
    }

    /// Watch a collection; the receiver sees every published change.
    #[must_use]
    pub fn subscribe(&self, key: &CollectionKey) -> watch::Receiver<CacheView<V>> {
        self.with_state(key, |state| state.sender.subscribe())
    }

    /// Apply an optimistic edit and publish the result.
    ///
    /// `build` sees the visible snapshot at this moment, so edits such as a
    /// toggle are computed from current state. Reads started before this
    /// call are invalidated.
    pub fn begin<F>(&self, key: &CollectionKey, build: F) -> PendingMutation<V>
    where
        F: FnOnce(&Snapshot<V>) -> Edit<V>,
    {
        self.with_state(key, |state| {
            state.epoch += 1;

            let before = state.view.clone();
            let edit = build(&before);
            let after = edit.apply(&before);
            let id = MutationId::new();

            state.pending.push(PendingEdit {
                id,
                edit: edit.clone(),
            });
            state.view = after.clone();
            state.publish();

            PendingMutation {
                id,
                collection: key.clone(),
                edit,
                before,
                after,
            }
        })
    }

    /// Settle a mutation the server accepted.
    ///
    /// With a server snapshot the authoritative state is replaced wholesale;
    /// without one the edit is folded into it.
    pub fn confirm(&self, pending: &PendingMutation<V>, snapshot: Option<Vec<V>>) {
        self.with_state(&pending.collection, |state| {
            if !state.take(pending.id) {
                return;
            }
            match snapshot {
                Some(items) => {
                    state.base = Snapshot::from_items(items);
                    state.base_epoch = state.epoch;
                    state.loaded = true;
                    state.stale = false;
                }
                None => state.base = pending.edit.apply(&state.base),
            }
            state.record(pending.id, MutationStatus::Confirmed);
            state.rebuild();
            state.publish();
        });
    }

    /// Discard a mutation the server rejected.
    ///
    /// The view becomes the authoritative state plus the edits still pending.
    /// With no other edit in flight and no server state applied meanwhile
    /// that is exactly `pending.before`.
    pub fn rollback(&self, pending: &PendingMutation<V>) {
        self.with_state(&pending.collection, |state| {
            if !state.take(pending.id) {
                return;
            }
            state.record(pending.id, MutationStatus::RolledBack);
            state.rebuild();
            state.publish();
        });
    }

    /// Settle a mutation whose target no longer exists server-side.
    ///
    /// The target is dropped from the authoritative state rather than
    /// restored, and the collection is marked stale for a refetch.
    pub fn resync(&self, pending: &PendingMutation<V>) {
        self.with_state(&pending.collection, |state| {
            if !state.take(pending.id) {
                return;
            }
            state.base = match pending.edit.target() {
                Some(key) => state.base.apply_remove(key),
                None => state.base.apply_clear(),
            };
            state.stale = true;
            state.record(pending.id, MutationStatus::Resynced);
            state.rebuild();
            state.publish();
        });
    }

    /// Start a read of a collection.
    #[must_use]
    pub fn begin_fetch(&self, key: &CollectionKey) -> FetchTicket {
        self.with_state(key, |state| FetchTicket { epoch: state.epoch })
    }

    /// Apply a completed read.
    ///
    /// Returns `false` when the read is outdated: a mutation began after it
    /// started, or edits are still pending and the server state may already
    /// contain some of them. The collection is then marked stale, unless a
    /// server snapshot newer than the read has already been applied.
    pub fn complete_fetch(&self, key: &CollectionKey, ticket: FetchTicket, items: Vec<V>) -> bool {
        self.with_state(key, |state| {
            if ticket.epoch != state.epoch || !state.pending.is_empty() {
                let superseded = state.pending.is_empty() && state.base_epoch > ticket.epoch;
                if !superseded && !state.stale {
                    state.stale = true;
                    state.publish();
                }
                return false;
            }
            state.base = Snapshot::from_items(items);
            state.base_epoch = state.epoch;
            state.loaded = true;
            state.stale = false;
            state.rebuild();
            state.publish();
            true
        })
    }

    /// Mark a collection as diverged from the server.
    pub fn invalidate(&self, key: &CollectionKey) {
        self.with_state(key, |state| {
            state.stale = true;
            state.publish();
        });
    }

    /// Whether the collection is stale with nothing pending, so a read
    /// issued now would be applied.
    #[must_use]
    pub fn needs_refetch(&self, key: &CollectionKey) -> bool {
        self.with_state(key, |state| state.stale && state.pending.is_empty())
    }

    fn with_state<T>(&self, key: &CollectionKey, f: impl FnOnce(&mut CollectionState<V>) -> T) -> T {
        let mut collections = self.lock();
        let state = collections
            .entry(key.clone())
            .or_insert_with(CollectionState::new);
        f(state)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CollectionKey, CollectionState<V>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: CacheEntity> fmt::Debug for OptimisticCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collections = self.lock();
        f.debug_struct("OptimisticCache")
            .field("collections", &collections.keys().collect::<Vec<_>>())
            .finish()
    }
}
