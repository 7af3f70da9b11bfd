//! Key material: the non-secret parameters needed to re-derive the store key
//!
//! Persisted once per namespace as
//! `{"v":1,"saltB64":"...","kdf":{...},"algo":{...}}`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::crypto::{generate_salt, CipherParams, KdfParams, SALT_LEN};
use crate::error::{Result, StoreError};
use crate::storage::KeyValueBackend;

/// Reserved key holding the serialized key material
pub const KEY_MATERIAL_KEY: &str = "__ss_key_material";

/// Reserved key holding the material a fresh-salt re-key replaced, kept
/// until that re-key completes
pub const PREVIOUS_KEY_MATERIAL_KEY: &str = "__ss_key_material_prev";

/// Current key material schema version
pub const KEY_MATERIAL_VERSION: u32 = 1;

/// Salt and algorithm parameters for one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    pub v: u32,
    pub salt_b64: String,
    pub kdf: KdfParams,
    pub algo: CipherParams,
}

impl KeyMaterial {
    /// Fresh material with a random salt
    pub fn generate(kdf: KdfParams) -> Result<Self> {
        let salt = generate_salt()?;
        Ok(Self {
            v: KEY_MATERIAL_VERSION,
            salt_b64: codec::to_base64(&salt),
            kdf,
            algo: CipherParams::default(),
        })
    }

    /// Decoded salt bytes
    pub fn salt(&self) -> Result<[u8; SALT_LEN]> {
        let bytes = codec::from_base64(&self.salt_b64)?;
        bytes.as_slice().try_into().map_err(|_| {
            StoreError::Format(format!(
                "Invalid salt length: expected {}, got {}",
                SALT_LEN,
                bytes.len()
            ))
        })
    }

    /// Schema check applied to every record read back from storage
    pub fn validate(&self) -> Result<()> {
        if self.v != KEY_MATERIAL_VERSION {
            return Err(StoreError::Format(format!(
                "Unsupported key material version: {}",
                self.v
            )));
        }
        self.salt()?;
        self.kdf.validate()?;
        self.algo.validate()
    }
}

/// Reads and lazily creates the namespace's key material
#[derive(Clone)]
pub struct KeyMaterialStore {
    backend: Arc<dyn KeyValueBackend>,
    /// KDF parameters used only when new material is created
    defaults: KdfParams,
}

impl KeyMaterialStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, defaults: KdfParams) -> Self {
        Self { backend, defaults }
    }

    /// Return the stored key material, creating it if absent or malformed.
    ///
    /// A valid record is never replaced: a new salt would orphan every
    /// envelope written under the old one. Fails with `Environment` when the
    /// backend cannot be read or written.
    pub async fn get_or_create(&self) -> Result<KeyMaterial> {
        if let Some(material) = self.load().await.map_err(unavailable)? {
            return Ok(material);
        }

        let material = self.generate()?;
        self.save(&material).await.map_err(unavailable)?;

        info!("Created new key material");
        Ok(material)
    }

    /// Fresh material under the configured KDF defaults, not yet persisted
    pub fn generate(&self) -> Result<KeyMaterial> {
        KeyMaterial::generate(self.defaults.clone())
    }

    /// Read the stored record, treating a malformed one as absent
    pub async fn load(&self) -> Result<Option<KeyMaterial>> {
        self.load_record(KEY_MATERIAL_KEY).await
    }

    /// Overwrite the stored record
    pub async fn save(&self, material: &KeyMaterial) -> Result<()> {
        self.backend
            .write(KEY_MATERIAL_KEY, &serde_json::to_string(material)?)
            .await
    }

    /// Delete the stored record; the next `get_or_create` makes a new salt
    pub async fn wipe(&self) -> Result<()> {
        self.backend.delete(KEY_MATERIAL_KEY).await?;
        info!("Wiped key material");
        Ok(())
    }

    /// Material left behind by an unfinished fresh-salt re-key
    pub async fn load_previous(&self) -> Result<Option<KeyMaterial>> {
        self.load_record(PREVIOUS_KEY_MATERIAL_KEY).await
    }

    pub(crate) async fn save_previous(&self, material: &KeyMaterial) -> Result<()> {
        self.backend
            .write(PREVIOUS_KEY_MATERIAL_KEY, &serde_json::to_string(material)?)
            .await
    }

    pub(crate) async fn discard_previous(&self) -> Result<()> {
        self.backend.delete(PREVIOUS_KEY_MATERIAL_KEY).await
    }

    async fn load_record(&self, key: &str) -> Result<Option<KeyMaterial>> {
        let raw = match self.backend.read(key).await? {
            Some(raw) => raw,
            None => {
                debug!(key, "No key material stored");
                return Ok(None);
            }
        };

        let parsed = serde_json::from_str::<KeyMaterial>(&raw)
            .map_err(StoreError::from)
            .and_then(|material| material.validate().map(|_| material));

        match parsed {
            Ok(material) => Ok(Some(material)),
            Err(e) => {
                warn!(key, error = %e, "Stored key material is malformed, ignoring");
                Ok(None)
            }
        }
    }
}

fn unavailable(e: StoreError) -> StoreError {
    match e {
        StoreError::Environment(_) => e,
        other => StoreError::Environment(format!("Key material storage unavailable: {}", other)),
    }
}
