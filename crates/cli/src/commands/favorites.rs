//! Favorites commands.

use storefront_sync::error::Result;
use storefront_sync::{FavoriteItem, Favorites};
use storefront_sync_core::ProductId;

/// Print favorited products.
pub async fn list(favorites: &Favorites) -> Result<()> {
    let view = favorites.load().await?;

    if view.snapshot.is_empty() {
        tracing::info!("No favorites");
    }
    for item in view.snapshot.iter() {
        tracing::info!(
            "{:<12} {}",
            item.product_id,
            item.title.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Flip whether a product is favorited.
pub async fn toggle(favorites: &Favorites, product_id: String, title: Option<String>) -> Result<()> {
    favorites.load().await?;

    let product_id = ProductId::new(product_id);
    favorites
        .toggle(FavoriteItem::new(product_id.clone(), title))
        .await?;

    if favorites.is_favorite(&product_id) {
        tracing::info!("Favorited {product_id}");
    } else {
        tracing::info!("Unfavorited {product_id}");
    }
    Ok(())
}
