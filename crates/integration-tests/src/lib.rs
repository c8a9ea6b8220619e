//! Integration tests for storefront-sync.
//!
//! Every test drives the real pipeline, refresh coordinator, and synchronizers
//! against a [`ScriptedExecutor`], so the protocol can be exercised end to end
//! with precise control over when each response arrives.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p storefront-sync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `session_refresh` - Single-flight refresh, failure fan-out, login redirects
//! - `cart_sync` - Optimistic cart mutations and their reconciliation
//! - `favorites_sync` - Toggle mutations and dependent refetches

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use storefront_sync::auth::{CredentialHolder, CredentialStore};
use storefront_sync::testing::ScriptedExecutor;
use storefront_sync::{
    Cart, CartCollection, CartLine, ClientConfig, Favorites, FavoritesCollection, RequestPipeline,
};
use storefront_sync_core::{AccessCredential, CurrencyCode, Price, ProductId, VariantId};
use url::Url;

pub use storefront_sync::testing::{Gate, RecordedCall, require_token};

/// A pipeline wired to a scripted executor.
pub struct TestContext {
    pub executor: Arc<ScriptedExecutor>,
    pub credentials: Arc<CredentialHolder>,
    pub pipeline: RequestPipeline,
}

impl TestContext {
    /// Context with no credential.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::build(None, config())
    }

    /// Context holding `token`.
    #[must_use]
    pub fn with_token(token: &str) -> Self {
        Self::build(Some(AccessCredential::new(token)), config())
    }

    /// Context holding `token` with a custom refresh timeout.
    #[must_use]
    pub fn with_refresh_timeout(token: &str, timeout: Duration) -> Self {
        let mut config = config();
        config.auth.refresh_timeout = timeout;
        Self::build(Some(AccessCredential::new(token)), config)
    }

    fn build(credential: Option<AccessCredential>, config: ClientConfig) -> Self {
        let executor = Arc::new(ScriptedExecutor::new());
        let credentials = Arc::new(match credential {
            Some(credential) => CredentialHolder::with_credential(credential),
            None => CredentialHolder::new(),
        });
        let pipeline = RequestPipeline::with_parts(&config, executor.clone(), credentials.clone());
        Self {
            executor,
            credentials,
            pipeline,
        }
    }

    #[must_use]
    pub fn cart(&self) -> Cart {
        Cart::new(CartCollection, self.pipeline.clone())
    }

    #[must_use]
    pub fn favorites(&self) -> Favorites {
        Favorites::new(FavoritesCollection, self.pipeline.clone())
    }

    /// The token currently held, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<String> {
        self.credentials
            .get()
            .map(|credential| credential.expose_token().to_string())
    }

    /// Queue a successful refresh issuing `token`.
    pub fn refresh_succeeds(&self, token: &str) {
        self.executor.respond(
            Method::POST,
            "/auth/refresh",
            StatusCode::OK,
            Some(json!({ "access_token": token, "expires_in": 900 })),
        );
    }

    /// Queue a rejected refresh.
    pub fn refresh_fails(&self) {
        self.executor
            .respond(Method::POST, "/auth/refresh", StatusCode::UNAUTHORIZED, None);
    }

    /// Serve `GET /cart` with `lines` once and wait for the load.
    ///
    /// # Panics
    ///
    /// Panics if the load fails.
    pub async fn load_cart(&self, cart: &Cart, lines: &[(&str, i64)]) {
        self.executor
            .respond(Method::GET, "/cart", StatusCode::OK, Some(cart_body(lines)));
        cart.load().await.expect("cart load");
    }
}

fn config() -> ClientConfig {
    ClientConfig::new(Url::parse("http://storefront.test/api/").expect("static url"))
}

/// Cart line for variant `variant` at $10.00.
#[must_use]
pub fn line(variant: &str, quantity: i64) -> CartLine {
    CartLine {
        variant_id: VariantId::new(variant),
        product_id: ProductId::new(format!("product-{variant}")),
        title: format!("Item {variant}"),
        quantity,
        unit_price: Price::from_cents(1000, CurrencyCode::USD),
    }
}

/// `{ "items": [...] }` body for the given lines.
#[must_use]
pub fn cart_body(lines: &[(&str, i64)]) -> Value {
    let items: Vec<CartLine> = lines.iter().map(|(v, q)| line(v, *q)).collect();
    json!({ "items": items })
}

/// Quantities of the visible cart, in order.
#[must_use]
pub fn quantities(cart: &Cart) -> Vec<(String, i64)> {
    cart.view()
        .snapshot
        .iter()
        .map(|line| (line.variant_id.to_string(), line.quantity))
        .collect()
}
