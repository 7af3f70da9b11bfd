//! Passphrase rotation
//!
//! `Armed(old) -> snapshot -> Armed(new) -> rewrite -> Armed(new, consistent)`.
//!
//! The rewrite is in place with no rollback. If it stops part way, the
//! entries not yet rewritten stay under the old key and can only be read by
//! re-arming the old passphrase. Entries left out of the snapshot are never
//! rewritten, so the caller must list every entry it wants to keep.
//!
//! A fresh-salt re-key keeps the replaced key material under a reserved key
//! until the rewrite finishes; [`SecureStore::arm_previous`] derives the old
//! key from it.

use serde_json::Value;
use tracing::{info, warn};

use crate::crypto::{self, DerivedKey};
use crate::error::{Result, StoreError};
use crate::material::KeyMaterial;
use crate::store::{is_reserved, SecureStore};

/// How the new key is derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RekeyOptions {
    /// Derive under a new salt (full reset). Once the re-key completes,
    /// entries outside the snapshot are unreadable under any passphrase.
    pub fresh_salt: bool,
}

/// Outcome of a completed re-key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RekeyReport {
    /// Entries now encrypted under the new key
    pub rewritten: Vec<String>,
    /// Entries that were absent or unreadable under the old key
    pub absent: Vec<String>,
}

impl SecureStore {
    /// Move `entries` from the armed key to a key derived from `new_passphrase`.
    ///
    /// Holds the store's exclusive gate for the whole sequence, so no other
    /// `get`/`set` on this store can land between snapshot and rewrite. On a
    /// failed rewrite the session stays armed with the new key and the error
    /// is `RekeyIncomplete`, naming what was already moved. Any failure before
    /// the rewrite leaves the stored material and verifier as they were.
    ///
    /// A completed re-key drops any previous key material.
    pub async fn rekey(
        &self,
        entries: &[&str],
        new_passphrase: &str,
        options: RekeyOptions,
    ) -> Result<RekeyReport> {
        let _exclusive = self.gate.write().await;

        // the old key must be armed to read the snapshot
        self.session.current()?;

        let mut snapshot: Vec<(String, Value)> = Vec::with_capacity(entries.len());
        let mut absent = Vec::new();

        for &entry in entries {
            if is_reserved(entry) {
                return Err(StoreError::ReservedKey(entry.to_string()));
            }
            match self.read_entry::<Value>(entry).await? {
                Some(value) => snapshot.push((entry.to_string(), value)),
                None => {
                    warn!(key = entry, "Entry absent or unreadable under current key, not rewritten");
                    absent.push(entry.to_string());
                }
            }
        }

        let current = self.materials.get_or_create().await?;
        let next = if options.fresh_salt {
            self.materials.generate()?
        } else {
            current.clone()
        };
        let new_key = crypto::derive(new_passphrase, &next).await?;

        if options.fresh_salt {
            self.install_material(&current, &next, &new_key).await?;
        } else {
            self.write_verifier(&new_key).await?;
        }
        self.session.arm(new_key);

        let total = snapshot.len();
        let mut rewritten = Vec::with_capacity(total);

        for (entry, value) in snapshot {
            if let Err(e) = self.write_entry(&entry, &value).await {
                warn!(key = %entry, error = %e, "Re-key stopped part way");
                return Err(StoreError::RekeyIncomplete {
                    rewritten,
                    failed_key: entry,
                    total,
                    source: Box::new(e),
                });
            }
            rewritten.push(entry);
        }

        if let Err(e) = self.materials.discard_previous().await {
            warn!(error = %e, "Could not drop previous key material");
        }

        info!(
            "Re-key complete: {} entries rewritten, {} absent",
            rewritten.len(),
            absent.len()
        );
        Ok(RekeyReport { rewritten, absent })
    }

    /// Arm a key derived from the material an unfinished fresh-salt re-key
    /// replaced. Returns `false` when no such material is stored.
    ///
    /// Entries the re-key did not reach are readable again, and a plain
    /// re-key of them moves them under the new passphrase.
    pub async fn arm_previous(&self, passphrase: &str) -> Result<bool> {
        let material = match self.materials.load_previous().await? {
            Some(material) => material,
            None => return Ok(false),
        };

        let key = crypto::derive(passphrase, &material).await?;
        self.session.arm(key);
        info!("Armed key from previous key material");
        Ok(true)
    }

    /// Persist `next` with a verifier for `new_key`, keeping `current` as the
    /// previous material. Restores `current` if either write fails.
    async fn install_material(
        &self,
        current: &KeyMaterial,
        next: &KeyMaterial,
        new_key: &DerivedKey,
    ) -> Result<()> {
        self.materials.save_previous(current).await?;

        let installed = match self.materials.save(next).await {
            Ok(()) => self.write_verifier(new_key).await,
            Err(e) => Err(e),
        };

        if let Err(e) = installed {
            match self.materials.save(current).await {
                Ok(()) => {
                    if let Err(discard) = self.materials.discard_previous().await {
                        warn!(error = %discard, "Could not drop previous key material");
                    }
                }
                Err(restore) => {
                    warn!(error = %restore, "Could not restore key material, previous copy kept");
                }
            }
            return Err(e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::session::SessionKeyCache;
    use crate::settings::Settings;
    use crate::storage::{KeyValueBackend, MemoryBackend};
    use crate::store::VERIFIER_KEY;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_settings() -> Settings {
        Settings {
            kdf: KdfParams::argon2id(1, 256, 1),
            ..Settings::default()
        }
    }

    fn test_store(backend: Arc<dyn KeyValueBackend>) -> SecureStore {
        SecureStore::with_settings(backend, SessionKeyCache::new(), &fast_settings())
    }

    async fn seeded() -> (SecureStore, MemoryBackend) {
        let backend = MemoryBackend::new();
        let store = test_store(Arc::new(backend.clone()));
        store.set_encryption_passphrase("old").await.unwrap();
        store.set_item("a", &1).await.unwrap();
        store.set_item("b", "x").await.unwrap();
        (store, backend)
    }

    #[tokio::test]
    async fn test_rekey_consistency() {
        let (store, _) = seeded().await;

        let report = store
            .rekey(&["a", "b"], "new", RekeyOptions::default())
            .await
            .unwrap();
        assert_eq!(report.rewritten, vec!["a".to_string(), "b".to_string()]);
        assert!(report.absent.is_empty());

        store.lock();
        store.set_encryption_passphrase("old").await.unwrap();
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), None);
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), None);

        store.set_encryption_passphrase("new").await.unwrap();
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), Some(json!("x")));
    }

    #[tokio::test]
    async fn test_rekey_moves_verifier() {
        let (store, _) = seeded().await;

        store.rekey(&["a", "b"], "new", RekeyOptions::default()).await.unwrap();
        store.lock();

        assert!(!store.check_passphrase("old").await.unwrap());
        assert!(store.check_passphrase("new").await.unwrap());
        assert!(matches!(store.unlock("old").await, Err(StoreError::InvalidPassphrase)));
    }

    #[tokio::test]
    async fn test_rekey_reuses_salt_by_default() {
        let (store, _) = seeded().await;
        let before = store.materials().get_or_create().await.unwrap();

        store.rekey(&["a"], "new", RekeyOptions::default()).await.unwrap();

        assert_eq!(store.materials().get_or_create().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_entries_outside_snapshot_stay_under_old_key() {
        let (store, _) = seeded().await;
        store.set_item("forgotten", "still here").await.unwrap();

        store.rekey(&["a", "b"], "new", RekeyOptions::default()).await.unwrap();
        assert_eq!(store.get_item::<String>("forgotten").await.unwrap(), None);

        // recoverable by temporarily re-arming the old passphrase
        store.set_encryption_passphrase("old").await.unwrap();
        let recovered: String = store.get_item("forgotten").await.unwrap().unwrap();
        assert_eq!(recovered, "still here");

        store.set_encryption_passphrase("new").await.unwrap();
        store.set_item("forgotten", &recovered).await.unwrap();
        assert_eq!(
            store.get_item::<String>("forgotten").await.unwrap().as_deref(),
            Some("still here")
        );
    }

    #[tokio::test]
    async fn test_rekey_with_fresh_salt() {
        let (store, _) = seeded().await;
        store.set_item("forgotten", "gone").await.unwrap();
        let before = store.materials().get_or_create().await.unwrap();

        store
            .rekey(&["a", "b"], "new", RekeyOptions { fresh_salt: true })
            .await
            .unwrap();

        let after = store.materials().get_or_create().await.unwrap();
        assert_ne!(before.salt_b64, after.salt_b64);
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(1)));

        // old passphrase under the new salt no longer opens anything
        store.set_encryption_passphrase("old").await.unwrap();
        assert_eq!(store.get_item::<String>("forgotten").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rekey_reports_absent_entries() {
        let (store, _) = seeded().await;

        let report = store
            .rekey(&["a", "missing"], "new", RekeyOptions::default())
            .await
            .unwrap();

        assert_eq!(report.rewritten, vec!["a".to_string()]);
        assert_eq!(report.absent, vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn test_rekey_includes_legacy_entries() {
        let (store, backend) = seeded().await;
        backend.write("legacy", "\"plain\"").await.unwrap();

        store.rekey(&["legacy"], "new", RekeyOptions::default()).await.unwrap();

        assert!(store.inspect("legacy").await.unwrap().unwrap().is_sealed());
        assert_eq!(
            store.get_item::<String>("legacy").await.unwrap().as_deref(),
            Some("plain")
        );
    }

    #[tokio::test]
    async fn test_rekey_requires_armed_key() {
        let (store, _) = seeded().await;
        store.lock();

        let result = store.rekey(&["a"], "new", RekeyOptions::default()).await;

        assert!(matches!(result, Err(StoreError::NotReady)));
        assert!(!store.ready());
    }

    #[tokio::test]
    async fn test_rekey_rejects_reserved_entries() {
        let (store, _) = seeded().await;

        let result = store
            .rekey(&["a", crate::store::VERIFIER_KEY], "new", RekeyOptions::default())
            .await;

        assert!(matches!(result, Err(StoreError::ReservedKey(_))));
        // nothing changed: old key still armed and working
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(1)));
    }

    /// Backend that starts failing entry writes after a set number succeed,
    /// and can refuse verifier writes
    struct FlakyBackend {
        inner: MemoryBackend,
        entry_writes_left: AtomicUsize,
        fail_verifier: AtomicBool,
    }

    fn disk_full() -> StoreError {
        StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
    }

    async fn flaky_seeded() -> (SecureStore, Arc<FlakyBackend>) {
        let backend = Arc::new(FlakyBackend {
            inner: MemoryBackend::new(),
            entry_writes_left: AtomicUsize::new(usize::MAX),
            fail_verifier: AtomicBool::new(false),
        });
        let store = test_store(backend.clone());
        store.set_encryption_passphrase("old").await.unwrap();
        store.set_item("a", &1).await.unwrap();
        store.set_item("b", "x").await.unwrap();
        (store, backend)
    }

    #[async_trait]
    impl KeyValueBackend for FlakyBackend {
        async fn read(&self, key: &str) -> Result<Option<String>> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, value: &str) -> Result<()> {
            if key == VERIFIER_KEY && self.fail_verifier.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            if !is_reserved(key) {
                let left = self.entry_writes_left.load(Ordering::SeqCst);
                if left == 0 {
                    return Err(disk_full());
                }
                self.entry_writes_left.store(left - 1, Ordering::SeqCst);
            }
            self.inner.write(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }

        fn backend_name(&self) -> &'static str {
            "Flaky Storage"
        }
    }

    #[tokio::test]
    async fn test_partial_rekey_leaves_mixed_state() {
        let (store, backend) = flaky_seeded().await;

        // only the first rewrite succeeds
        backend.entry_writes_left.store(1, Ordering::SeqCst);
        let result = store.rekey(&["a", "b"], "new", RekeyOptions::default()).await;

        match result {
            Err(StoreError::RekeyIncomplete {
                rewritten,
                failed_key,
                total,
                ..
            }) => {
                assert_eq!(rewritten, vec!["a".to_string()]);
                assert_eq!(failed_key, "b");
                assert_eq!(total, 2);
            }
            other => panic!("expected RekeyIncomplete, got {:?}", other),
        }

        // Armed(new, inconsistent): a moved, b did not
        assert!(store.ready());
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), None);

        // recover b by re-arming the old key, then finish under the new one
        backend.entry_writes_left.store(usize::MAX, Ordering::SeqCst);
        store.set_encryption_passphrase("old").await.unwrap();
        let b: Value = store.get_item("b").await.unwrap().unwrap();
        assert_eq!(b, json!("x"));

        store.set_encryption_passphrase("new").await.unwrap();
        store.set_item("b", &b).await.unwrap();
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), Some(json!("x")));
    }

    #[tokio::test]
    async fn test_failed_fresh_salt_setup_keeps_old_passphrase() {
        let (store, backend) = flaky_seeded().await;
        let before = store.materials().get_or_create().await.unwrap();

        backend.fail_verifier.store(true, Ordering::SeqCst);
        let result = store.rekey(&["a"], "new", RekeyOptions { fresh_salt: true }).await;
        assert!(matches!(result, Err(StoreError::Io(_))));

        assert_eq!(store.materials().get_or_create().await.unwrap(), before);
        assert!(store.materials().load_previous().await.unwrap().is_none());

        backend.fail_verifier.store(false, Ordering::SeqCst);
        store.lock();
        store.unlock("old").await.unwrap();
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), Some(json!("x")));
    }

    #[tokio::test]
    async fn test_partial_fresh_salt_rekey_recovers_from_previous_material() {
        let (store, backend) = flaky_seeded().await;
        let before = store.materials().get_or_create().await.unwrap();

        backend.entry_writes_left.store(1, Ordering::SeqCst);
        let result = store
            .rekey(&["a", "b"], "new", RekeyOptions { fresh_salt: true })
            .await;
        assert!(matches!(result, Err(StoreError::RekeyIncomplete { .. })));
        assert_eq!(store.materials().load_previous().await.unwrap(), Some(before));

        // the old passphrase under the new salt opens nothing
        backend.entry_writes_left.store(usize::MAX, Ordering::SeqCst);
        store.set_encryption_passphrase("old").await.unwrap();
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), None);

        assert!(store.arm_previous("old").await.unwrap());
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), Some(json!("x")));

        let report = store.rekey(&["b"], "new", RekeyOptions::default()).await.unwrap();
        assert_eq!(report.rewritten, vec!["b".to_string()]);
        assert!(store.materials().load_previous().await.unwrap().is_none());

        store.lock();
        store.unlock("new").await.unwrap();
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get_item::<Value>("b").await.unwrap(), Some(json!("x")));
    }

    #[tokio::test]
    async fn test_arm_previous_without_material() {
        let (store, _) = seeded().await;

        assert!(!store.arm_previous("old").await.unwrap());
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_concurrent_set_waits_for_rekey() {
        let (store, _) = seeded().await;

        let rekeying = store.clone();
        let rekey = tokio::spawn(async move {
            rekeying
                .rekey(&["a", "b"], "new", RekeyOptions::default())
                .await
        });

        // give the re-key task a head start so it owns the gate
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.set_item("a", &99).await.unwrap();

        rekey.await.unwrap().unwrap();

        // whichever ran first, the write survives under the new key
        store.set_encryption_passphrase("new").await.unwrap();
        assert_eq!(store.get_item::<Value>("a").await.unwrap(), Some(json!(99)));
    }
}
