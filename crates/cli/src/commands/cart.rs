//! Cart commands.
//!
//! Every command loads the cart first. Without a configured access token
//! that read is what triggers the cookie refresh, so the mutation that
//! follows passes the authentication precondition.

use rust_decimal::Decimal;
use storefront_sync::error::Result;
use storefront_sync::{Cart, CartLine};
use storefront_sync_core::{CurrencyCode, Price, ProductId, VariantId};

/// Print the cart.
pub async fn show(cart: &Cart) -> Result<()> {
    cart.load().await?;
    print(cart);
    Ok(())
}

/// Add `quantity` units of a variant.
pub async fn add(
    cart: &Cart,
    variant_id: String,
    product_id: String,
    title: String,
    quantity: i64,
    unit_price: Decimal,
) -> Result<()> {
    cart.load().await?;

    let line = CartLine {
        variant_id: VariantId::new(variant_id),
        product_id: ProductId::new(product_id),
        title,
        quantity,
        unit_price: Price::new(unit_price, CurrencyCode::USD),
    };
    tracing::info!("Adding {} x {}", line.quantity, line.title);

    cart.add(line).await?;
    print(cart);
    Ok(())
}

/// Set the quantity of a line.
pub async fn set(cart: &Cart, variant_id: String, quantity: i64) -> Result<()> {
    cart.load().await?;
    cart.set_quantity(VariantId::new(variant_id), quantity).await?;
    print(cart);
    Ok(())
}

/// Remove a line.
pub async fn remove(cart: &Cart, variant_id: String) -> Result<()> {
    cart.load().await?;
    cart.remove(VariantId::new(variant_id)).await?;
    print(cart);
    Ok(())
}

/// Empty the cart.
pub async fn clear(cart: &Cart) -> Result<()> {
    cart.load().await?;
    cart.clear().await?;
    tracing::info!("Cart cleared");
    Ok(())
}

fn print(cart: &Cart) {
    let view = cart.view();
    if view.snapshot.is_empty() {
        tracing::info!("Cart is empty");
        return;
    }

    for line in view.snapshot.iter() {
        tracing::info!(
            "{:<12} {:<32} {:>4} x {:>9} = {:>9}",
            line.variant_id,
            line.title,
            line.quantity,
            line.unit_price,
            line.line_price()
        );
    }

    let summary = cart.summary();
    tracing::info!("{} items, subtotal {}", summary.item_count, summary.subtotal);
}
