//! Signed-in user profile.

use serde::{Deserialize, Serialize};

use super::id::CustomerId;

/// Profile of the signed-in customer.
///
/// Delivered alongside a fresh credential by login and, optionally, by the
/// refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Customer ID.
    pub id: CustomerId,
    /// Email address, if shared.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name, if set.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserProfile {
    /// Name to greet the customer with.
    #[must_use]
    pub fn greeting_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or_else(|| self.id.as_str())
    }
}
