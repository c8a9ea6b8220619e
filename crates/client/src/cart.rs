//! Server-owned cart.
//!
//! Every cart endpoint answers with the full cart (`{ "items": [...] }`), so
//! each confirmed write replaces the cached cart with what the server holds,
//! correcting any price or stock drift the optimistic edit could not know about.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storefront_sync_core::{CurrencyCode, Price, ProductId, VariantId};
use tracing::instrument;

use crate::error::Result;
use crate::pipeline::{ApiRequest, RequestPipeline};
use crate::sync::{CacheEntity, CollectionKey, Edit, RemoteCollection, Snapshot, Synchronizer, WriteAck};

/// A line item in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Variant this line is for; unique within the cart.
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub title: String,
    pub quantity: i64,
    /// Price per unit.
    pub unit_price: Price,
}

impl CartLine {
    /// Line total (unit price × quantity).
    #[must_use]
    pub fn line_price(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

impl CacheEntity for CartLine {
    type Key = VariantId;
    type Field = i64;

    fn key(&self) -> &VariantId {
        &self.variant_id
    }

    fn merge(&self, incoming: &Self) -> Self {
        Self {
            quantity: self.quantity.saturating_add(incoming.quantity),
            ..incoming.clone()
        }
    }

    fn with_field(&self, quantity: &i64) -> Self {
        Self {
            quantity: *quantity,
            ..self.clone()
        }
    }

    fn is_vacant(&self) -> bool {
        self.quantity <= 0
    }
}

/// Cart display totals derived from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSummary {
    pub item_count: i64,
    pub subtotal: Price,
}

impl CartSummary {
    /// Totals of `snapshot`. Currency follows the first line (USD when empty).
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot<CartLine>) -> Self {
        let currency_code = snapshot
            .iter()
            .next()
            .map_or(CurrencyCode::default(), |line| line.unit_price.currency_code);
        let amount = snapshot
            .iter()
            .map(|line| line.line_price().amount)
            .fold(Decimal::ZERO, Decimal::saturating_add);

        Self {
            item_count: snapshot
                .iter()
                .map(|line| line.quantity.max(0))
                .fold(0, i64::saturating_add),
            subtotal: Price::new(amount, currency_code),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CartBody {
    items: Vec<CartLine>,
}

/// The cart endpoints of the storefront API.
#[derive(Debug, Clone, Default)]
pub struct CartCollection;

impl CartCollection {
    fn line_path(variant_id: &VariantId) -> String {
        format!("/cart/items/{variant_id}")
    }

    fn request_for(edit: &Edit<CartLine>) -> ApiRequest {
        match edit {
            Edit::Add(line) | Edit::SetMember { item: line, present: true } => {
                ApiRequest::post("/cart/items").json(json!(line))
            }
            Edit::Update { key, field } => {
                ApiRequest::patch(Self::line_path(key)).json(json!({ "quantity": field }))
            }
            Edit::Remove(key) => ApiRequest::delete(Self::line_path(key)),
            Edit::SetMember { item, present: false } => {
                ApiRequest::delete(Self::line_path(&item.variant_id))
            }
            Edit::Clear => ApiRequest::delete("/cart"),
        }
    }
}

#[async_trait]
impl RemoteCollection for CartCollection {
    type Item = CartLine;

    fn key(&self) -> CollectionKey {
        CollectionKey::new("cart")
    }

    #[instrument(skip(self, pipeline))]
    async fn fetch(&self, pipeline: &RequestPipeline) -> Result<Vec<CartLine>> {
        let body: CartBody = pipeline.send_json(ApiRequest::get("/cart")).await?;
        Ok(body.items)
    }

    #[instrument(skip(self, pipeline, edit), fields(edit = edit.label()))]
    async fn write(
        &self,
        pipeline: &RequestPipeline,
        edit: &Edit<CartLine>,
    ) -> Result<WriteAck<CartLine>> {
        let response = pipeline.send(Self::request_for(edit)).await?;

        match response.body {
            Some(body) if body.get("items").is_some() => {
                let cart: CartBody = serde_json::from_value(body)?;
                Ok(WriteAck::Snapshot(cart.items))
            }
            _ => Ok(WriteAck::Accepted),
        }
    }
}

/// Cart synchronizer.
pub type Cart = Synchronizer<CartCollection>;

impl Synchronizer<CartCollection> {
    /// Totals of the visible cart, pending edits included.
    #[must_use]
    pub fn summary(&self) -> CartSummary {
        CartSummary::from_snapshot(&self.view().snapshot)
    }

    /// Set the quantity of a line; zero or less removes it.
    ///
    /// # Errors
    ///
    /// Returns the precondition or write error after the cache is reconciled.
    pub async fn set_quantity(&self, variant_id: VariantId, quantity: i64) -> Result<()> {
        if quantity <= 0 {
            return self.remove(variant_id).await;
        }
        self.update(variant_id, quantity).await
    }
}
