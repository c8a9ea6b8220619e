//! Server side of a synchronized collection.

use async_trait::async_trait;

use super::snapshot::{CacheEntity, Edit};
use super::store::CollectionKey;
use crate::error::Result;
use crate::pipeline::RequestPipeline;

/// How the server answered a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAck<V> {
    /// The full authoritative collection after the write.
    Snapshot(Vec<V>),
    /// The write was applied; the response carries no collection state.
    Accepted,
}

/// A collection owned by the server and mirrored in the optimistic cache.
#[async_trait]
pub trait RemoteCollection: Send + Sync + 'static {
    type Item: CacheEntity;

    /// Cache key of this collection.
    fn key(&self) -> CollectionKey;

    /// Whether mutations need a credential. Checked before any cache or
    /// network effect.
    fn requires_auth(&self) -> bool {
        true
    }

    /// Read the authoritative collection.
    async fn fetch(&self, pipeline: &RequestPipeline) -> Result<Vec<Self::Item>>;

    /// Send one edit to the server.
    async fn write(
        &self,
        pipeline: &RequestPipeline,
        edit: &Edit<Self::Item>,
    ) -> Result<WriteAck<Self::Item>>;
}
