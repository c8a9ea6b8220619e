//! Storefront Sync client library.
//!
//! Authenticated request pipeline with single-flight credential refresh, and
//! the optimistic cache synchronizer the cart and favorites are built on.
//!
//! # Modules
//!
//! - [`auth`] - Credential holder, refresh coordinator, session events, login redirects
//! - [`pipeline`] - Request pipeline and the HTTP executor behind it
//! - [`sync`] - Snapshots, optimistic cache, and the mutation synchronizer
//! - [`cart`] / [`favorites`] - Concrete collections over the storefront API
//! - [`config`] / [`error`] / [`telemetry`] - Configuration, error taxonomy, logging bootstrap

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod cart;
pub mod config;
pub mod error;
pub mod favorites;
pub mod pipeline;
pub mod sync;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cart::{Cart, CartCollection, CartLine, CartSummary};
pub use config::{AuthConfig, ClientConfig, ConfigError};
pub use error::{ApiError, ErrorKind};
pub use favorites::{FavoriteItem, Favorites, FavoritesCollection};
pub use pipeline::{ApiRequest, ApiResponse, HttpExecutor, RequestPipeline};
