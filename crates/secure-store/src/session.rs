//! In-memory session key cache
//!
//! Holds the derived key between unlock and lock. Nothing here is ever
//! persisted, so process exit always leaves the store locked.

use std::sync::{Arc, RwLock};
use tracing::info;

use crate::crypto::DerivedKey;
use crate::error::{Result, StoreError};

/// Single-slot holder for the active session key.
///
/// Cloning yields another handle onto the same slot. Separate
/// `SessionKeyCache::new()` instances are fully independent, which lets one
/// process simulate several devices.
#[derive(Clone, Default)]
pub struct SessionKeyCache {
    slot: Arc<RwLock<Option<Arc<DerivedKey>>>>,
}

impl SessionKeyCache {
    /// Create an empty (locked) cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `key`, replacing any previous key
    pub fn arm(&self, key: DerivedKey) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(key));
        info!("Session armed");
    }

    /// Drop the current key
    pub fn disarm(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if slot.take().is_some() {
            info!("Session disarmed");
        }
    }

    /// Whether a key is currently installed
    pub fn is_ready(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Handle to the current key, or `NotReady` when locked
    pub(crate) fn current(&self) -> Result<Arc<DerivedKey>> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(StoreError::NotReady)
    }
}

impl std::fmt::Debug for SessionKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyCache")
            .field("ready", &self.is_ready())
            .finish()
    }
}
