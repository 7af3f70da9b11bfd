//! AES-256-GCM authenticated encryption
//!
//! Every call draws a fresh 12-byte nonce from the OS RNG. The 16-byte tag is
//! kept appended to the ciphertext, the layout `aes-gcm` produces.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{secure_random, DerivedKey, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::codec;
use crate::envelope::EncryptedEnvelope;
use crate::error::{Result, StoreError};

/// Algorithm name recorded in key material
pub const AES_GCM: &str = "AES-GCM";

/// Cipher parameters, as persisted in key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherParams {
    /// Algorithm name
    pub name: String,
    /// Key length in bits
    pub length: u32,
    /// Nonce length in bytes
    pub iv_bytes: u32,
}

impl Default for CipherParams {
    fn default() -> Self {
        Self {
            name: AES_GCM.to_string(),
            length: (KEY_LEN * 8) as u32,
            iv_bytes: NONCE_LEN as u32,
        }
    }
}

impl CipherParams {
    /// Only AES-256-GCM with 96-bit nonces is supported
    pub fn validate(&self) -> Result<()> {
        if *self != Self::default() {
            return Err(StoreError::Format(format!(
                "Unsupported cipher: {} / {} bits / {} byte nonce",
                self.name, self.length, self.iv_bytes
            )));
        }
        Ok(())
    }
}

/// Encrypt raw bytes under `key` with a fresh random nonce
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> Result<EncryptedEnvelope> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    secure_random(&mut nonce)?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    Ok(EncryptedEnvelope::new(nonce, ciphertext))
}

/// Decrypt an envelope, verifying its tag.
///
/// Fails with `Integrity` on a wrong key or any modified byte; no plaintext is
/// returned unless the tag verifies.
pub fn decrypt(envelope: &EncryptedEnvelope, key: &DerivedKey) -> Result<Zeroizing<Vec<u8>>> {
    if envelope.ciphertext().len() < TAG_LEN {
        return Err(StoreError::Integrity("Ciphertext too short".to_string()));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(envelope.nonce()), envelope.ciphertext())
        .map(Zeroizing::new)
        .map_err(|_| StoreError::Integrity("Authentication tag mismatch".to_string()))
}

/// Serialize `value` to JSON and encrypt it
pub fn encrypt_value<T: Serialize + ?Sized>(value: &T, key: &DerivedKey) -> Result<EncryptedEnvelope> {
    let plaintext = Zeroizing::new(codec::to_json_bytes(value)?);
    encrypt(&plaintext, key)
}

/// Decrypt an envelope and parse the JSON it carries
pub fn decrypt_value<T: DeserializeOwned>(envelope: &EncryptedEnvelope, key: &DerivedKey) -> Result<T> {
    let plaintext = decrypt(envelope, key)?;
    codec::from_json_bytes(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_derivation::{derive_key, KdfParams};
    use serde_json::{json, Value};

    fn test_key(passphrase: &str) -> DerivedKey {
        derive_key(passphrase, &[9u8; 16], &KdfParams::argon2id(1, 256, 1)).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key("1234");
        let value = json!({"mood": "😊", "score": 4, "tags": ["sleep", "walk"], "note": null});

        let envelope = encrypt_value(&value, &key).unwrap();
        let decrypted: Value = decrypt_value(&envelope, &key).unwrap();

        assert_eq!(decrypted, value);
    }

    #[test]
    fn test_scalar_roundtrip() {
        let key = test_key("1234");

        let envelope = encrypt_value(&42, &key).unwrap();
        assert_eq!(decrypt_value::<i64>(&envelope, &key).unwrap(), 42);

        let envelope = encrypt_value("plain text", &key).unwrap();
        assert_eq!(decrypt_value::<String>(&envelope, &key).unwrap(), "plain text");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = test_key("1234");

        let first = encrypt_value("same value", &key).unwrap();
        let second = encrypt_value("same value", &key).unwrap();

        assert_ne!(first.nonce(), second.nonce());
        assert_ne!(first.ciphertext(), second.ciphertext());
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let key1 = test_key("old");
        let key2 = test_key("new");

        let envelope = encrypt_value(&json!({"a": 1}), &key1).unwrap();
        let result = decrypt_value::<Value>(&envelope, &key2);

        assert!(matches!(result, Err(StoreError::Integrity(_))));
    }

    #[test]
    fn test_wrong_key_different_salt_fails() {
        let key1 = test_key("1234");
        let key2 = derive_key("1234", &[3u8; 16], &KdfParams::argon2id(1, 256, 1)).unwrap();

        let envelope = encrypt_value(&1, &key1).unwrap();
        assert!(matches!(
            decrypt_value::<Value>(&envelope, &key2),
            Err(StoreError::Integrity(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails_decryption() {
        let key = test_key("1234");
        let envelope = encrypt_value("secret data", &key).unwrap();

        let mut bytes = envelope.ciphertext().to_vec();
        bytes[0] ^= 0x01;
        let tampered = EncryptedEnvelope::new(*envelope.nonce(), bytes);

        assert!(matches!(decrypt(&tampered, &key), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn test_tampered_tag_fails_decryption() {
        let key = test_key("1234");
        let envelope = encrypt_value("secret data", &key).unwrap();

        let mut bytes = envelope.ciphertext().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = EncryptedEnvelope::new(*envelope.nonce(), bytes);

        assert!(matches!(decrypt(&tampered, &key), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = test_key("1234");
        let short = EncryptedEnvelope::new([0u8; NONCE_LEN], vec![1, 2, 3]);

        assert!(matches!(decrypt(&short, &key), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn test_cipher_params() {
        let params = CipherParams::default();
        params.validate().unwrap();
        assert_eq!(params.length, 256);
        assert_eq!(params.iv_bytes, 12);

        let other = CipherParams {
            name: "AES-CBC".to_string(),
            ..CipherParams::default()
        };
        assert!(other.validate().is_err());
    }
}
