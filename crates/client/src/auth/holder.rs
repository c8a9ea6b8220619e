//! In-memory holder of the current access credential.

use std::sync::RwLock;

use storefront_sync_core::AccessCredential;

/// Read/write capability over the current access credential.
///
/// The pipeline receives this as an injected `Arc<dyn CredentialStore>` rather
/// than reaching for ambient state, so tests can substitute their own.
pub trait CredentialStore: Send + Sync {
    /// Current credential, if any.
    fn get(&self) -> Option<AccessCredential>;

    /// Replace the current credential.
    fn set(&self, credential: Option<AccessCredential>);

    /// Drop the current credential.
    fn clear(&self) {
        self.set(None);
    }

    /// Whether a credential is present.
    fn is_present(&self) -> bool {
        self.get().is_some()
    }
}

/// Process-wide credential cell. Never persisted to durable storage.
#[derive(Debug, Default)]
pub struct CredentialHolder {
    credential: RwLock<Option<AccessCredential>>,
}

impl CredentialHolder {
    /// Create an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a holder that already carries a credential.
    #[must_use]
    pub fn with_credential(credential: AccessCredential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for CredentialHolder {
    fn get(&self) -> Option<AccessCredential> {
        // A writer that panicked mid-assignment still left a whole value behind
        match self.credential.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, credential: Option<AccessCredential>) {
        match self.credential.write() {
            Ok(mut guard) => *guard = credential,
            Err(poisoned) => *poisoned.into_inner() = credential,
        }
    }
}
