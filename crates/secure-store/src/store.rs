//! Store facade: the get/set/remove surface the rest of the app calls
//!
//! Reads accept both legacy plaintext and encrypted envelopes; every write
//! produces an envelope under the armed session key.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::codec;
use crate::crypto::{self, decrypt_value, encrypt_value, DerivedKey};
use crate::envelope::StoredValue;
use crate::error::{Result, StoreError};
use crate::material::{KeyMaterialStore, KEY_MATERIAL_KEY, PREVIOUS_KEY_MATERIAL_KEY};
use crate::session::SessionKeyCache;
use crate::settings::Settings;
use crate::storage::KeyValueBackend;

/// Reserved key set once legacy migration has run
pub const MIGRATION_FLAG_KEY: &str = "__ss_migrated";
/// Reserved key holding an envelope of [`VERIFIER_PLAINTEXT`]
pub const VERIFIER_KEY: &str = "__ss_verifier";
/// Reserved key holding the device-generated default secret
pub const DEVICE_SECRET_KEY: &str = "__ss_device_secret";

const MIGRATION_DONE: &str = "1";
const VERIFIER_PLAINTEXT: &str = "secure-store-verification";
const DEVICE_SECRET_LEN: usize = 32;

/// Whether `key` is managed by the store itself
pub fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        KEY_MATERIAL_KEY
            | PREVIOUS_KEY_MATERIAL_KEY
            | MIGRATION_FLAG_KEY
            | VERIFIER_KEY
            | DEVICE_SECRET_KEY
    )
}

/// Outcome of [`SecureStore::migrate_from_legacy`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Keys rewritten from plaintext to envelopes
    pub migrated: Vec<String>,
    /// True when the completion flag was already set and nothing ran
    pub already_complete: bool,
}

/// Encrypted key-value store over a pluggable backend
#[derive(Clone)]
pub struct SecureStore {
    pub(crate) backend: Arc<dyn KeyValueBackend>,
    pub(crate) materials: KeyMaterialStore,
    pub(crate) session: SessionKeyCache,
    pub(crate) sentinel: String,
    /// Shared by ordinary operations, held exclusively by re-key
    pub(crate) gate: Arc<RwLock<()>>,
}

impl SecureStore {
    /// Create a store with default settings
    pub fn new(backend: Arc<dyn KeyValueBackend>, session: SessionKeyCache) -> Self {
        Self::with_settings(backend, session, &Settings::default())
    }

    /// Create a store using the sentinel and KDF defaults from `settings`
    pub fn with_settings(
        backend: Arc<dyn KeyValueBackend>,
        session: SessionKeyCache,
        settings: &Settings,
    ) -> Self {
        let materials = KeyMaterialStore::new(backend.clone(), settings.kdf.clone());

        debug!(
            "Secure store created on {} (namespace {})",
            backend.backend_name(),
            settings.namespace
        );

        Self {
            backend,
            materials,
            session,
            sentinel: settings.sentinel.clone(),
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Session cache this store reads its key from
    pub fn session(&self) -> &SessionKeyCache {
        &self.session
    }

    /// Key material store for this namespace
    pub fn materials(&self) -> &KeyMaterialStore {
        &self.materials
    }

    /// Whether a key is armed; poll-friendly for UI gating
    pub fn ready(&self) -> bool {
        self.session.is_ready()
    }

    /// Derive a key from `passphrase` and arm the session with it.
    ///
    /// Does not check the passphrase; see [`SecureStore::unlock`].
    pub async fn set_encryption_passphrase(&self, passphrase: &str) -> Result<()> {
        let key = self.derive_for(passphrase).await?;
        self.ensure_verifier(&key).await?;
        self.session.arm(key);
        Ok(())
    }

    /// Report whether `passphrase` opens the stored verifier, without arming.
    ///
    /// With no verifier stored yet any passphrase is accepted.
    pub async fn check_passphrase(&self, passphrase: &str) -> Result<bool> {
        let key = self.derive_for(passphrase).await?;
        self.verifies(&key).await
    }

    /// Arm only if `passphrase` opens the stored verifier
    pub async fn unlock(&self, passphrase: &str) -> Result<()> {
        let key = self.derive_for(passphrase).await?;

        if !self.verifies(&key).await? {
            warn!("Unlock rejected: passphrase does not match verifier");
            return Err(StoreError::InvalidPassphrase);
        }

        self.ensure_verifier(&key).await?;
        self.session.arm(key);
        Ok(())
    }

    /// Arm with the device-generated default secret, creating it on first use.
    ///
    /// Used when the user has not configured a PIN.
    pub async fn arm_with_device_secret(&self) -> Result<()> {
        let secret = match self.backend.read(DEVICE_SECRET_KEY).await? {
            Some(secret) => Zeroizing::new(secret),
            None => {
                let mut bytes = Zeroizing::new([0u8; DEVICE_SECRET_LEN]);
                crypto::secure_random(&mut bytes[..])?;
                let secret = Zeroizing::new(hex::encode(&bytes[..]));
                self.backend.write(DEVICE_SECRET_KEY, &secret).await?;
                info!("Generated device default secret");
                secret
            }
        };

        self.set_encryption_passphrase(&secret).await
    }

    /// Disarm the session; persisted data is untouched
    pub fn lock(&self) {
        self.session.disarm();
    }

    /// Read and decode the value stored under `key`.
    ///
    /// Returns `Ok(None)` for absent keys and for entries that cannot be
    /// decrypted or decoded (logged as warnings). Fails with `NotReady` only
    /// when the entry is encrypted and no key is armed.
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        reject_reserved(key)?;
        let _shared = self.gate.read().await;
        self.read_entry(key).await
    }

    /// Encrypt `value` and store it under `key`, replacing prior content
    pub async fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let _shared = self.gate.read().await;
        self.write_entry(key, value).await
    }

    /// Delete `key`
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        reject_reserved(key)?;
        let _shared = self.gate.read().await;
        self.backend.delete(key).await?;
        debug!("Removed key: {}", key);
        Ok(())
    }

    /// Wipe the whole namespace, key material included, and disarm
    pub async fn clear_all(&self) -> Result<()> {
        let _shared = self.gate.read().await;
        self.session.disarm();
        self.backend.clear().await?;
        info!("Cleared all entries");
        Ok(())
    }

    /// Caller-visible keys (reserved keys excluded)
    pub async fn keys(&self) -> Result<Vec<String>> {
        let keys = self.backend.keys().await?;
        Ok(keys.into_iter().filter(|k| !is_reserved(k)).collect())
    }

    /// Classify the raw value stored under `key` without decrypting it
    pub async fn inspect(&self, key: &str) -> Result<Option<StoredValue>> {
        match self.backend.read(key).await? {
            Some(raw) => StoredValue::parse(&raw, &self.sentinel).map(Some),
            None => Ok(None),
        }
    }

    /// Encrypt legacy plaintext entries in place, once.
    ///
    /// Each listed key that holds plaintext is parsed as JSON (falling back
    /// to the raw string) and rewritten as an envelope. The completion flag is
    /// set afterwards even if nothing needed migrating, so later calls are
    /// no-ops. An error before the flag is written leaves it unset.
    pub async fn migrate_from_legacy(&self, keys: &[&str]) -> Result<MigrationReport> {
        let _shared = self.gate.read().await;
        let session_key = self.session.current()?;

        if self.backend.read(MIGRATION_FLAG_KEY).await?.as_deref() == Some(MIGRATION_DONE) {
            debug!("Legacy migration already complete");
            return Ok(MigrationReport {
                migrated: Vec::new(),
                already_complete: true,
            });
        }

        let mut migrated = Vec::new();

        for &key in keys {
            if is_reserved(key) {
                continue;
            }

            let raw = match self.backend.read(key).await? {
                Some(raw) => raw,
                None => continue,
            };

            let text = match StoredValue::parse(&raw, &self.sentinel) {
                Ok(StoredValue::Legacy(text)) => text,
                Ok(StoredValue::Sealed(_)) => continue,
                Err(e) => {
                    warn!(key, error = %e, "Skipping unreadable entry during migration");
                    continue;
                }
            };

            let value = codec::parse_lenient(&text);
            let envelope = encrypt_value(&value, &session_key)?;
            self.backend
                .write(key, &StoredValue::Sealed(envelope).encode(&self.sentinel)?)
                .await?;

            debug!("Migrated legacy key: {}", key);
            migrated.push(key.to_string());
        }

        self.backend.write(MIGRATION_FLAG_KEY, MIGRATION_DONE).await?;

        info!("Legacy migration complete: {} entries encrypted", migrated.len());
        Ok(MigrationReport {
            migrated,
            already_complete: false,
        })
    }

    pub(crate) async fn derive_for(&self, passphrase: &str) -> Result<DerivedKey> {
        let material = self.materials.get_or_create().await?;
        crypto::derive(passphrase, &material).await
    }

    pub(crate) async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = match self.backend.read(key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match StoredValue::parse(&raw, &self.sentinel) {
            Ok(StoredValue::Legacy(text)) => Ok(decode_legacy(key, &text)),
            Ok(StoredValue::Sealed(envelope)) => {
                let session_key = self.session.current()?;
                match decrypt_value::<T>(&envelope, &session_key) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) if e.is_data_quality() => {
                        warn!(key, error = %e, "Entry could not be decrypted, treating as missing");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                warn!(key, error = %e, "Entry is not a valid envelope, treating as missing");
                Ok(None)
            }
        }
    }

    pub(crate) async fn write_entry<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        reject_reserved(key)?;
        let session_key = self.session.current()?;

        let envelope = encrypt_value(value, &session_key)?;
        self.backend
            .write(key, &StoredValue::Sealed(envelope).encode(&self.sentinel)?)
            .await?;

        debug!("Stored key: {}", key);
        Ok(())
    }

    /// Write the verifier under `key` unless one already exists
    async fn ensure_verifier(&self, key: &DerivedKey) -> Result<()> {
        if self.backend.read(VERIFIER_KEY).await?.is_none() {
            self.write_verifier(key).await?;
        }
        Ok(())
    }

    pub(crate) async fn write_verifier(&self, key: &DerivedKey) -> Result<()> {
        let envelope = encrypt_value(VERIFIER_PLAINTEXT, key)?;
        self.backend
            .write(VERIFIER_KEY, &StoredValue::Sealed(envelope).encode(&self.sentinel)?)
            .await?;
        debug!("Saved verification data");
        Ok(())
    }

    async fn verifies(&self, key: &DerivedKey) -> Result<bool> {
        let raw = match self.backend.read(VERIFIER_KEY).await? {
            Some(raw) => raw,
            None => return Ok(true),
        };

        let envelope = match StoredValue::parse(&raw, &self.sentinel) {
            Ok(StoredValue::Sealed(envelope)) => envelope,
            _ => {
                warn!("Verifier entry is malformed");
                return Ok(false);
            }
        };

        match decrypt_value::<String>(&envelope, key) {
            Ok(text) => Ok(text == VERIFIER_PLAINTEXT),
            Err(e) if e.is_data_quality() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn reject_reserved(key: &str) -> Result<()> {
    if is_reserved(key) {
        return Err(StoreError::ReservedKey(key.to_string()));
    }
    Ok(())
}

/// Decode plaintext written before encryption existed
fn decode_legacy<T: DeserializeOwned>(key: &str, text: &str) -> Option<T> {
    let parsed = codec::parse_lenient(text);
    let decoded = serde_json::from_value::<T>(parsed)
        .or_else(|_| serde_json::from_value::<T>(Value::String(text.to_string())));

    match decoded {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Legacy entry does not match requested type");
            None
        }
    }
}
