//! Persisted value representations
//!
//! A stored value is either legacy plaintext JSON written before encryption
//! was introduced, or a sentinel-prefixed envelope:
//!
//! `secure:{"v":1,"iv":"<base64 nonce>","ct":"<base64 ciphertext+tag>"}`

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::crypto::NONCE_LEN;
use crate::error::{Result, StoreError};

/// Default marker distinguishing envelopes from legacy plaintext
pub const DEFAULT_SENTINEL: &str = "secure:";

/// Current envelope schema version
pub const ENVELOPE_VERSION: u32 = 1;

/// Nonce plus authenticated ciphertext for one stored entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    v: u32,
    iv: String,
    ct: String,
}

impl EncryptedEnvelope {
    pub(crate) fn new(nonce: [u8; NONCE_LEN], ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// Nonce used for this entry
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Ciphertext with the authentication tag appended
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialize to the JSON body (without sentinel)
    pub fn to_json(&self) -> Result<String> {
        let wire = WireEnvelope {
            v: ENVELOPE_VERSION,
            iv: codec::to_base64(&self.nonce),
            ct: codec::to_base64(&self.ciphertext),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Parse the JSON body (without sentinel)
    pub fn from_json(body: &str) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_str(body)
            .map_err(|e| StoreError::Format(format!("Invalid envelope: {}", e)))?;

        if wire.v != ENVELOPE_VERSION {
            return Err(StoreError::Format(format!(
                "Unsupported envelope version: {}",
                wire.v
            )));
        }

        let nonce_bytes = codec::from_base64(&wire.iv)?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            StoreError::Format(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;
        let ciphertext = codec::from_base64(&wire.ct)?;

        Ok(Self { nonce, ciphertext })
    }
}

/// What a raw persisted string turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// Plaintext JSON text from before migration
    Legacy(String),
    /// Encrypted entry
    Sealed(EncryptedEnvelope),
}

impl StoredValue {
    /// Classify a raw persisted value.
    ///
    /// Anything without the sentinel is legacy plaintext. A value carrying the
    /// sentinel but not a valid envelope is a `Format` error.
    pub fn parse(raw: &str, sentinel: &str) -> Result<Self> {
        match raw.strip_prefix(sentinel) {
            Some(body) => EncryptedEnvelope::from_json(body).map(StoredValue::Sealed),
            None => Ok(StoredValue::Legacy(raw.to_string())),
        }
    }

    /// Produce the raw persisted form
    pub fn encode(&self, sentinel: &str) -> Result<String> {
        match self {
            StoredValue::Legacy(text) => Ok(text.clone()),
            StoredValue::Sealed(envelope) => Ok(format!("{}{}", sentinel, envelope.to_json()?)),
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, StoredValue::Sealed(_))
    }
}
