//! Mutation lifecycle: precondition, optimistic apply, write, reconcile.
//!
//! ```text
//! start(edit) ──► precondition ──✗──► PreconditionFailed (no cache, no network)
//!                     │ ✓
//!                     ▼
//!              cache.begin (synchronous; publishes `after`)
//!                     │
//!                     ▼  spawned task
//!              remote.write ──► Snapshot ──► confirm (replace wholesale)
//!                     │    └──► Accepted ──► confirm (fold) + background refetch
//!                     ├──► NotFound ──────► resync (drop target) + refetch
//!                     └──► other error ───► rollback + surface
//! ```

use std::sync::{Arc, Mutex, PoisonError, Weak};

use storefront_sync_core::MutationId;
use tokio::sync::{oneshot, watch};
use tracing::{Instrument, instrument};

use super::collection::{RemoteCollection, WriteAck};
use super::snapshot::{CacheEntity, Edit, Snapshot};
use super::store::{CacheView, CollectionKey, OptimisticCache, PendingMutation};
use crate::error::{ApiError, Result, add_breadcrumb, report_unhandled};
use crate::pipeline::RequestPipeline;

type Item<C> = <C as RemoteCollection>::Item;
type Key<C> = <Item<C> as CacheEntity>::Key;
type Field<C> = <Item<C> as CacheEntity>::Field;
type Refetcher = Box<dyn Fn() + Send + Sync>;

/// Handle to a mutation that has been applied optimistically.
#[derive(Debug)]
pub struct MutationHandle {
    id: MutationId,
    collection: CollectionKey,
    outcome: oneshot::Receiver<Result<()>>,
}

impl MutationHandle {
    #[must_use]
    pub const fn id(&self) -> MutationId {
        self.id
    }

    #[must_use]
    pub const fn collection(&self) -> &CollectionKey {
        &self.collection
    }

    /// Wait for the mutation to settle.
    ///
    /// # Errors
    ///
    /// Returns the error the write failed with, after the cache has been
    /// rolled back (or resynchronized for `ApiError::NotFound`).
    pub async fn outcome(self) -> Result<()> {
        self.outcome.await.unwrap_or_else(|_| {
            Err(ApiError::Unknown {
                status: 0,
                message: "mutation task ended without settling".to_string(),
            })
        })
    }
}

/// Keeps one remote collection and its optimistic cache in step.
pub struct Synchronizer<C: RemoteCollection> {
    inner: Arc<SynchronizerInner<C>>,
}

impl<C: RemoteCollection> Clone for Synchronizer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SynchronizerInner<C: RemoteCollection> {
    remote: C,
    key: CollectionKey,
    pipeline: RequestPipeline,
    cache: Arc<OptimisticCache<Item<C>>>,
    dependents: Mutex<Vec<Refetcher>>,
}

impl<C: RemoteCollection> Synchronizer<C> {
    /// Create a synchronizer with its own cache.
    #[must_use]
    pub fn new(remote: C, pipeline: RequestPipeline) -> Self {
        Self::with_cache(remote, pipeline, Arc::new(OptimisticCache::new()))
    }

    /// Create a synchronizer over a shared cache.
    #[must_use]
    pub fn with_cache(
        remote: C,
        pipeline: RequestPipeline,
        cache: Arc<OptimisticCache<Item<C>>>,
    ) -> Self {
        let key = remote.key();
        Self {
            inner: Arc::new(SynchronizerInner {
                remote,
                key,
                pipeline,
                cache,
                dependents: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &CollectionKey {
        &self.inner.key
    }

    #[must_use]
    pub fn remote(&self) -> &C {
        &self.inner.remote
    }

    #[must_use]
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.inner.pipeline
    }

    /// Current view, including pending edits.
    #[must_use]
    pub fn view(&self) -> CacheView<Item<C>> {
        self.inner.cache.view(&self.inner.key)
    }

    /// Watch the collection for changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CacheView<Item<C>>> {
        self.inner.cache.subscribe(&self.inner.key)
    }

    /// Refetch `dependent` in the background whenever a write here is
    /// accepted without a snapshot.
    pub fn add_dependent<D: RemoteCollection>(&self, dependent: &Synchronizer<D>) {
        let weak: Weak<SynchronizerInner<D>> = Arc::downgrade(&dependent.inner);
        let refetch: Refetcher = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.spawn_refetch();
            }
        });
        self.inner
            .dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(refetch);
    }

    /// Fetch the collection unless an authoritative snapshot is already held.
    ///
    /// # Errors
    ///
    /// Returns any error from the read.
    pub async fn load(&self) -> Result<CacheView<Item<C>>> {
        let view = self.view();
        if view.loaded && !view.stale {
            return Ok(view);
        }
        self.inner.refetch().await
    }

    /// Fetch the collection now.
    ///
    /// A read overtaken by a mutation is discarded and the view returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns any error from the read.
    pub async fn refetch(&self) -> Result<CacheView<Item<C>>> {
        self.inner.refetch().await
    }

    /// Refetch without waiting; failures are logged.
    pub fn refetch_in_background(&self) {
        self.inner.spawn_refetch();
    }

    /// Start a mutation built from the visible snapshot.
    ///
    /// The precondition check and the optimistic apply both happen before
    /// this returns. The write and its reconciliation run on their own task,
    /// so the mutation settles even if the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::PreconditionFailed` if the collection requires a
    /// credential and none is held. Nothing is sent and the cache is untouched.
    pub fn start<F>(&self, build: F) -> Result<MutationHandle>
    where
        F: FnOnce(&Snapshot<Item<C>>) -> Edit<Item<C>>,
    {
        let inner = &self.inner;

        if inner.remote.requires_auth() && !inner.pipeline.is_authenticated() {
            tracing::debug!(collection = %inner.key, "Mutation rejected: not authenticated");
            return Err(ApiError::PreconditionFailed(format!(
                "sign in to change the {}",
                inner.key
            )));
        }

        let pending = inner.cache.begin(&inner.key, build);
        let id = pending.id;
        let mutation_id = id.to_string();
        add_breadcrumb(
            "sync",
            &format!("Optimistic {} on {}", pending.edit.label(), inner.key),
            Some(&[("mutation_id", mutation_id.as_str())]),
        );

        let span = tracing::info_span!(
            "mutation",
            collection = %inner.key,
            mutation_id = %id,
            edit = pending.edit.label()
        );
        let (sender, receiver) = oneshot::channel();
        let task_inner = Arc::clone(inner);
        tokio::spawn(
            async move {
                let result = task_inner.settle(pending).await;
                let _ = sender.send(result);
            }
            .instrument(span),
        );

        Ok(MutationHandle {
            id,
            collection: inner.key.clone(),
            outcome: receiver,
        })
    }

    /// Start adding `item`, merging into an existing entry.
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub fn start_add(&self, item: Item<C>) -> Result<MutationHandle> {
        self.start(move |_| Edit::Add(item))
    }

    /// Start replacing the mutable field of `key`.
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub fn start_update(&self, key: Key<C>, field: Field<C>) -> Result<MutationHandle> {
        self.start(move |_| Edit::Update { key, field })
    }

    /// Start removing `key`.
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub fn start_remove(&self, key: Key<C>) -> Result<MutationHandle> {
        self.start(move |_| Edit::Remove(key))
    }

    /// Start emptying the collection.
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub fn start_clear(&self) -> Result<MutationHandle> {
        self.start(|_| Edit::Clear)
    }

    /// Start flipping the membership of `item`, based on whether it is in
    /// the visible snapshot right now.
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub fn start_toggle(&self, item: Item<C>) -> Result<MutationHandle> {
        self.start(move |view| Edit::SetMember {
            present: !view.contains(item.key()),
            item,
        })
    }

    /// Add `item` and wait for the write to settle.
    ///
    /// # Errors
    ///
    /// Returns the precondition or write error; the cache has already been
    /// reconciled when it is returned.
    pub async fn add(&self, item: Item<C>) -> Result<()> {
        self.start_add(item)?.outcome().await
    }

    /// Replace the mutable field of `key` and wait for the write to settle.
    ///
    /// # Errors
    ///
    /// See [`Self::add`].
    pub async fn update(&self, key: Key<C>, field: Field<C>) -> Result<()> {
        self.start_update(key, field)?.outcome().await
    }

    /// Remove `key` and wait for the write to settle.
    ///
    /// # Errors
    ///
    /// See [`Self::add`].
    pub async fn remove(&self, key: Key<C>) -> Result<()> {
        self.start_remove(key)?.outcome().await
    }

    /// Empty the collection and wait for the write to settle.
    ///
    /// # Errors
    ///
    /// See [`Self::add`].
    pub async fn clear(&self) -> Result<()> {
        self.start_clear()?.outcome().await
    }

    /// Flip the membership of `item` and wait for the write to settle.
    ///
    /// # Errors
    ///
    /// See [`Self::add`].
    pub async fn toggle(&self, item: Item<C>) -> Result<()> {
        self.start_toggle(item)?.outcome().await
    }
}

impl<C: RemoteCollection> SynchronizerInner<C> {
    async fn settle(self: Arc<Self>, pending: PendingMutation<Item<C>>) -> Result<()> {
        let result = self.remote.write(&self.pipeline, &pending.edit).await;

        let outcome = match result {
            Ok(WriteAck::Snapshot(items)) => {
                self.cache.confirm(&pending, Some(items));
                tracing::debug!("Confirmed with server snapshot");
                Ok(())
            }
            Ok(WriteAck::Accepted) => {
                self.cache.confirm(&pending, None);
                self.cache.invalidate(&self.key);
                tracing::debug!("Accepted, refreshing from server");
                self.refetch_dependents();
                Ok(())
            }
            Err(ApiError::NotFound(message)) => {
                self.cache.resync(&pending);
                tracing::info!(message = %message, "Target gone server-side, resynchronizing");
                Err(ApiError::NotFound(message))
            }
            Err(err) => {
                self.cache.rollback(&pending);
                tracing::warn!(error = %err, "Write failed, rolled back");
                report_unhandled(&err);
                Err(err)
            }
        };

        if self.cache.needs_refetch(&self.key) {
            self.spawn_refetch();
        }
        outcome
    }

    #[instrument(skip(self), fields(collection = %self.key))]
    async fn refetch(self: &Arc<Self>) -> Result<CacheView<Item<C>>> {
        let ticket = self.cache.begin_fetch(&self.key);
        let items = self.remote.fetch(&self.pipeline).await?;

        if self.cache.complete_fetch(&self.key, ticket, items) {
            tracing::debug!("Applied server snapshot");
        } else {
            tracing::debug!("Discarded read overtaken by a mutation");
            // The mutation may have settled before this read did
            if self.cache.needs_refetch(&self.key) {
                self.spawn_refetch();
            }
        }
        Ok(self.cache.view(&self.key))
    }

    fn spawn_refetch(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = inner.refetch().await {
                tracing::warn!(collection = %inner.key, error = %err, "Background refetch failed");
                report_unhandled(&err);
            }
        });
    }

    fn refetch_dependents(&self) {
        let dependents = self
            .dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for refetch in dependents.iter() {
            refetch();
        }
    }
}

impl<C: RemoteCollection> std::fmt::Debug for Synchronizer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("collection", &self.inner.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use reqwest::{Method, StatusCode};
    use serde_json::json;
    use storefront_sync_core::{AccessCredential, MutationStatus};
    use url::Url;

    use super::*;
    use crate::auth::CredentialHolder;
    use crate::config::ClientConfig;
    use crate::error::TransportError;
    use crate::pipeline::ApiRequest;
    use crate::sync::snapshot::tests::{Counter, snapshot};
    use crate::testing::ScriptedExecutor;

    /// Counters stored as `[["key", count], ...]` under `/counters`.
    struct Counters;

    fn decode(body: serde_json::Value) -> Result<Vec<Counter>> {
        let pairs: Vec<(String, i64)> = serde_json::from_value(body)?;
        Ok(pairs.into_iter().map(|(k, c)| Counter::new(&k, c)).collect())
    }

    #[async_trait]
    impl RemoteCollection for Counters {
        type Item = Counter;

        fn key(&self) -> CollectionKey {
            CollectionKey::new("counters")
        }

        async fn fetch(&self, pipeline: &RequestPipeline) -> Result<Vec<Counter>> {
            let body = pipeline.send_json(ApiRequest::get("/counters")).await?;
            decode(body)
        }

        async fn write(
            &self,
            pipeline: &RequestPipeline,
            edit: &Edit<Counter>,
        ) -> Result<WriteAck<Counter>> {
            let request = match edit {
                Edit::Add(c) => ApiRequest::post("/counters").json(json!([c.key, c.count])),
                Edit::Update { key, field } => {
                    ApiRequest::patch(format!("/counters/{key}")).json(json!(field))
                }
                Edit::Remove(key) => ApiRequest::delete(format!("/counters/{key}")),
                Edit::Clear => ApiRequest::delete("/counters"),
                Edit::SetMember { item, present: true } => {
                    ApiRequest::put(format!("/counters/{}", item.key))
                }
                Edit::SetMember { item, present: false } => {
                    ApiRequest::delete(format!("/counters/{}", item.key))
                }
            };
            match pipeline.send(request).await?.body {
                Some(body) if body.is_array() => Ok(WriteAck::Snapshot(decode(body)?)),
                _ => Ok(WriteAck::Accepted),
            }
        }
    }

    fn synchronizer(authenticated: bool) -> (Synchronizer<Counters>, Arc<ScriptedExecutor>) {
        let executor = Arc::new(ScriptedExecutor::new());
        let config = ClientConfig::new(Url::parse("http://localhost:8080").expect("url"));
        let holder = if authenticated {
            CredentialHolder::with_credential(AccessCredential::new("good"))
        } else {
            CredentialHolder::new()
        };
        let pipeline = RequestPipeline::with_parts(&config, executor.clone(), Arc::new(holder));
        (Synchronizer::new(Counters, pipeline), executor)
    }

    async fn loaded(entries: serde_json::Value) -> (Synchronizer<Counters>, Arc<ScriptedExecutor>) {
        let (sync, executor) = synchronizer(true);
        executor.respond(Method::GET, "/counters", StatusCode::OK, Some(entries));
        sync.load().await.expect("load");
        (sync, executor)
    }

    #[tokio::test]
    async fn test_precondition_rejects_before_any_effect() {
        let (sync, executor) = synchronizer(false);
        let version = sync.view().version;

        let err = sync
            .start_add(Counter::new("x", 1))
            .expect_err("unauthenticated");

        assert!(matches!(err, ApiError::PreconditionFailed(_)));
        assert!(executor.calls().is_empty());
        assert_eq!(sync.view().version, version);
        assert!(sync.view().snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_add_then_network_failure_rolls_back() {
        let (sync, executor) = synchronizer(true);
        executor.fail(
            Method::POST,
            "/counters",
            TransportError::Io("connection reset".to_string()),
        );

        let handle = sync.start_add(Counter::new("x", 1)).expect("started");
        assert_eq!(sync.view().snapshot, snapshot(&[("x", 1)]));

        let id = handle.id();
        let err = handle.outcome().await.expect_err("network failure");

        assert!(matches!(err, ApiError::Network(_)));
        assert!(sync.view().snapshot.is_empty());
        assert_eq!(sync.view().status_of(id), Some(MutationStatus::RolledBack));
    }

    #[tokio::test]
    async fn test_server_snapshot_wins() {
        let (sync, executor) = loaded(json!([["a", 1]])).await;
        executor.respond(
            Method::PATCH,
            "/counters/a",
            StatusCode::OK,
            Some(json!([["a", 2], ["b", 5]])),
        );

        sync.update("a".to_string(), 3).await.expect("update");

        assert_eq!(sync.view().snapshot, snapshot(&[("a", 2), ("b", 5)]));
    }

    #[tokio::test]
    async fn test_not_found_resyncs_without_resurrecting() {
        let (sync, executor) = loaded(json!([["a", 1], ["y", 1]])).await;
        executor.respond(Method::DELETE, "/counters/y", StatusCode::NOT_FOUND, None);
        executor.respond(Method::GET, "/counters", StatusCode::OK, Some(json!([["a", 1]])));

        let err = sync.remove("y".to_string()).await.expect_err("gone");

        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(!sync.view().snapshot.contains(&"y".to_string()));
        executor.wait_for_calls(Method::GET, "/counters", 2).await;
    }

    #[tokio::test]
    async fn test_accepted_refetches_dependents() {
        let (sync, executor) = loaded(json!([])).await;
        let (other, other_executor) = synchronizer(true);
        sync.add_dependent(&other);

        executor.respond(Method::PUT, "/counters/fav", StatusCode::NO_CONTENT, None);
        executor.respond_always(Method::GET, "/counters", StatusCode::OK, Some(json!([["fav", 1]])));
        other_executor.respond(Method::GET, "/counters", StatusCode::OK, Some(json!([["z", 1]])));

        sync.toggle(Counter::new("fav", 1)).await.expect("toggle");

        other_executor.wait_for_calls(Method::GET, "/counters", 1).await;
        assert!(sync.view().snapshot.contains(&"fav".to_string()));
    }

    #[tokio::test]
    async fn test_load_is_cached() {
        let (sync, executor) = loaded(json!([["a", 1]])).await;

        let view = sync.load().await.expect("cached");

        assert_eq!(view.snapshot, snapshot(&[("a", 1)]));
        assert_eq!(executor.count(Method::GET, "/counters"), 1);
    }
}
