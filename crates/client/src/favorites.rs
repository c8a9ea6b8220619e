//! Customer favorites (wishlist).
//!
//! Favorites are toggled, not edited. The toggle direction is read from the
//! cache at the moment the user acts, and the endpoints answer without a body,
//! so a confirmed toggle is followed by a background refetch of favorites and
//! of whatever collections were registered as dependents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_sync_core::ProductId;
use tracing::instrument;

use crate::error::{ApiError, Result};
use crate::pipeline::{ApiRequest, RequestPipeline};
use crate::sync::{CacheEntity, CollectionKey, Edit, RemoteCollection, Synchronizer, WriteAck};

/// A favorited product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub title: Option<String>,
}

impl FavoriteItem {
    #[must_use]
    pub fn new(product_id: impl Into<ProductId>, title: Option<String>) -> Self {
        Self {
            product_id: product_id.into(),
            title,
        }
    }
}

impl CacheEntity for FavoriteItem {
    type Key = ProductId;
    type Field = ();

    fn key(&self) -> &ProductId {
        &self.product_id
    }

    fn merge(&self, incoming: &Self) -> Self {
        incoming.clone()
    }

    fn with_field(&self, _field: &()) -> Self {
        self.clone()
    }
}

#[derive(Debug, Deserialize)]
struct FavoritesBody {
    items: Vec<FavoriteItem>,
}

/// The favorites endpoints of the storefront API.
#[derive(Debug, Clone, Default)]
pub struct FavoritesCollection;

impl FavoritesCollection {
    fn item_path(product_id: &ProductId) -> String {
        format!("/favorites/{product_id}")
    }

    /// Request for `edit`; `None` when nothing needs to be sent.
    fn request_for(edit: &Edit<FavoriteItem>) -> Option<ApiRequest> {
        match edit {
            Edit::Add(item) | Edit::SetMember { item, present: true } => {
                Some(ApiRequest::put(Self::item_path(&item.product_id)))
            }
            Edit::Remove(product_id) => Some(ApiRequest::delete(Self::item_path(product_id))),
            Edit::SetMember { item, present: false } => {
                Some(ApiRequest::delete(Self::item_path(&item.product_id)))
            }
            // Favorites have no mutable field and no bulk endpoint
            Edit::Update { .. } | Edit::Clear => None,
        }
    }
}

#[async_trait]
impl RemoteCollection for FavoritesCollection {
    type Item = FavoriteItem;

    fn key(&self) -> CollectionKey {
        CollectionKey::new("favorites")
    }

    #[instrument(skip(self, pipeline))]
    async fn fetch(&self, pipeline: &RequestPipeline) -> Result<Vec<FavoriteItem>> {
        let body: FavoritesBody = pipeline.send_json(ApiRequest::get("/favorites")).await?;
        Ok(body.items)
    }

    #[instrument(skip(self, pipeline, edit), fields(edit = edit.label()))]
    async fn write(
        &self,
        pipeline: &RequestPipeline,
        edit: &Edit<FavoriteItem>,
    ) -> Result<WriteAck<FavoriteItem>> {
        if matches!(edit, Edit::Clear) {
            return Err(ApiError::PreconditionFailed(
                "favorites are removed one product at a time".to_string(),
            ));
        }
        if let Some(request) = Self::request_for(edit) {
            pipeline.send(request).await?;
        }
        Ok(WriteAck::Accepted)
    }
}

/// Favorites synchronizer.
pub type Favorites = Synchronizer<FavoritesCollection>;

impl Synchronizer<FavoritesCollection> {
    /// Whether `product_id` is favorited in the visible snapshot.
    #[must_use]
    pub fn is_favorite(&self, product_id: &ProductId) -> bool {
        self.view().snapshot.contains(product_id)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::*;
    use crate::sync::Snapshot;

    #[test]
    fn test_toggle_requests() {
        let item = FavoriteItem::new("p-1", Some("Tee".to_string()));

        let on = FavoritesCollection::request_for(&Edit::SetMember {
            item: item.clone(),
            present: true,
        })
        .expect("request");
        assert_eq!(on.method, Method::PUT);
        assert_eq!(on.path, "/favorites/p-1");

        let off = FavoritesCollection::request_for(&Edit::SetMember {
            item,
            present: false,
        })
        .expect("request");
        assert_eq!(off.method, Method::DELETE);
        assert_eq!(off.path, "/favorites/p-1");

        assert!(
            FavoritesCollection::request_for(&Edit::Update {
                key: ProductId::new("p-1"),
                field: (),
            })
            .is_none()
        );
        assert!(FavoritesCollection::request_for(&Edit::Clear).is_none());
    }

    #[test]
    fn test_membership_is_idempotent() {
        let item = FavoriteItem::new("p-1", None);
        let snapshot = Snapshot::new().apply_membership(&item, true);

        assert_eq!(snapshot.apply_membership(&item, true), snapshot);
        assert!(snapshot.apply_membership(&item, false).is_empty());
    }

    #[test]
    fn test_body_title_is_optional() {
        let body: FavoritesBody =
            serde_json::from_value(serde_json::json!({"items": [{"product_id": "p-9"}]}))
                .expect("decode");
        assert_eq!(body.items, vec![FavoriteItem::new("p-9", None)]);
    }
}
