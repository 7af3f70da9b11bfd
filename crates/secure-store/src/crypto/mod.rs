//! Cryptographic primitives for the encrypted store
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption of JSON values
//! - Argon2id key derivation from passphrases
//! - Secure memory handling with zeroize

mod encryption;
mod key_derivation;
mod secure_memory;

use rand::{rngs::OsRng, RngCore};

use crate::error::{Result, StoreError};

pub use encryption::{decrypt, decrypt_value, encrypt, encrypt_value, CipherParams};
pub use key_derivation::{derive, derive_key, generate_salt, KdfParams};
pub use secure_memory::DerivedKey;

/// Length of the salt (16 bytes)
pub const SALT_LEN: usize = 16;
/// Length of the GCM nonce (12 bytes / 96 bits)
pub const NONCE_LEN: usize = 12;
/// Length of the GCM authentication tag (16 bytes)
pub const TAG_LEN: usize = 16;
/// Length of the encryption key (32 bytes / 256 bits)
pub const KEY_LEN: usize = 32;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| StoreError::Environment(format!("OS random generator unavailable: {}", e)))
}
