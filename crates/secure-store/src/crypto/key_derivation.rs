//! Passphrase-based key derivation using Argon2id

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{secure_random, DerivedKey, KEY_LEN, SALT_LEN};
use crate::error::{Result, StoreError};
use crate::material::KeyMaterial;

/// Algorithm name recorded in key material
pub const ARGON2ID: &str = "argon2id";

/// Parameters for Argon2id key derivation, as persisted in key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Algorithm name (only "argon2id" is supported)
    pub name: String,
    /// Time cost / iterations (default: 3)
    pub iter: u32,
    /// Memory cost in KiB (default: 65536 = 64MB)
    pub mem_kib: u32,
    /// Parallelism (default: 1)
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            name: ARGON2ID.to_string(),
            iter: 3,
            mem_kib: 65536, // 64 MB
            lanes: 1,
        }
    }
}

impl KdfParams {
    /// Argon2id parameters with explicit costs
    pub fn argon2id(iter: u32, mem_kib: u32, lanes: u32) -> Self {
        Self {
            name: ARGON2ID.to_string(),
            iter,
            mem_kib,
            lanes,
        }
    }

    /// Check the parameters are something this build can reproduce
    pub fn validate(&self) -> Result<()> {
        if self.name != ARGON2ID {
            return Err(StoreError::KeyDerivation(format!(
                "Unsupported KDF: {}",
                self.name
            )));
        }
        if self.iter < 1 {
            return Err(StoreError::KeyDerivation(
                "argon2 time cost must be >= 1".to_string(),
            ));
        }
        if self.lanes < 1 {
            return Err(StoreError::KeyDerivation(
                "argon2 parallelism must be >= 1".to_string(),
            ));
        }
        if self.mem_kib < 8 * self.lanes {
            return Err(StoreError::KeyDerivation(
                "argon2 memory cost must be at least 8 * parallelism".to_string(),
            ));
        }
        Ok(())
    }
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}

/// Derive a 256-bit key from a passphrase using Argon2id.
///
/// This is CPU and memory heavy on purpose; async callers should go through
/// [`derive`].
pub fn derive_key(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<DerivedKey> {
    params.validate()?;

    let argon2_params = Params::new(params.mem_kib, params.iter, params.lanes, Some(KEY_LEN))
        .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key_bytes[..])
        .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey::new(*key_bytes))
}

/// Derive the session key for `passphrase` from the stored key material.
///
/// Runs on the blocking pool so the executor stays responsive. The passphrase
/// copy handed to the worker is wiped when derivation finishes.
pub async fn derive(passphrase: &str, material: &KeyMaterial) -> Result<DerivedKey> {
    let passphrase = Zeroizing::new(passphrase.to_string());
    let salt = material.salt()?;
    let params = material.kdf.clone();

    tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, &params))
        .await
        .map_err(|e| StoreError::KeyDerivation(format!("Derivation worker failed: {}", e)))?
}
