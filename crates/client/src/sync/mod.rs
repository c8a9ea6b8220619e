//! Optimistic cache synchronization.
//!
//! A mutation is visible in the cache the moment it starts and is reconciled
//! with the server when its write settles:
//!
//! - success with a collection snapshot replaces the cache with it;
//! - success without one folds the edit in and refetches in the background;
//! - `NotFound` drops the target and refetches instead of rolling back;
//! - any other failure discards the edit.
//!
//! Overlapping mutations on the same collection are reconciled
//! independently; see [`store`] for how an earlier failure is kept from
//! erasing a later edit.

pub mod collection;
pub mod snapshot;
pub mod store;
pub mod synchronizer;

pub use collection::{RemoteCollection, WriteAck};
pub use snapshot::{CacheEntity, Edit, Snapshot};
pub use store::{CacheView, CollectionKey, FetchTicket, OptimisticCache, PendingMutation};
pub use synchronizer::{MutationHandle, Synchronizer};
