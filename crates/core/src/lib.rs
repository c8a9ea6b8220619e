//! Storefront Sync Core - Shared types library.
//!
//! This crate provides the types shared by every storefront-sync component:
//! - `storefront-sync` - Request pipeline and optimistic cache synchronizer
//! - `storefront-sync-cli` - Command-line driver for cart and favorites
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no locks.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype keys, credentials, prices, profiles, and mutation statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
