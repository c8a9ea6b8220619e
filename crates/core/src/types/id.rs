//! Newtype keys for type-safe entity references.
//!
//! Use the `define_key!` macro to create type-safe key wrappers that prevent
//! accidentally mixing keys from different entity types. Server-issued keys
//! are opaque strings (e.g. `gid://shop/ProductVariant/42`), so every key
//! wraps a `String`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to define a type-safe string key wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<String>`, `From<&str>` and `Display` implementations
///
/// # Example
///
/// ```rust
/// # use storefront_sync_core::define_key;
/// define_key!(SkuKey);
/// define_key!(BundleKey);
///
/// let sku = SkuKey::new("sku-1");
/// let bundle = BundleKey::new("sku-1");
///
/// // These are different types, so this won't compile:
/// // let _: SkuKey = bundle;
/// assert_eq!(sku.as_str(), bundle.as_str());
/// ```
#[macro_export]
macro_rules! define_key {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new key from any string-like value.
            #[must_use]
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// Get the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert into the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_key!(ProductId);
define_key!(VariantId);
define_key!(CustomerId);

/// Identifier of one optimistic mutation, from the moment its edit is
/// applied locally until its network write settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Generate a fresh random mutation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl ::core::fmt::Display for MutationId {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MutationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
