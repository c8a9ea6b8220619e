//! Core types for storefront sync.
//!
//! This module provides type-safe wrappers for the domain concepts the
//! synchronizer and request pipeline exchange.

pub mod credential;
pub mod id;
pub mod price;
pub mod profile;
pub mod status;

pub use credential::AccessCredential;
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use profile::UserProfile;
pub use status::MutationStatus;
