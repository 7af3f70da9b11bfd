//! # secure-store
//!
//! Client-side encrypted key-value storage for personal data, including:
//! - Argon2id key derivation from a passphrase and a per-install salt
//! - AES-256-GCM envelopes with a fresh nonce per write
//! - An in-memory session key cache that is never persisted
//! - One-time migration of legacy plaintext entries
//! - Passphrase rotation (re-key) of a caller-named set of entries

pub mod codec;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod material;
mod rekey;
pub mod session;
pub mod settings;
pub mod storage;
mod store;

pub use crypto::{CipherParams, DerivedKey, KdfParams};
pub use envelope::{EncryptedEnvelope, StoredValue, DEFAULT_SENTINEL};
pub use error::{Result, StoreError};
pub use material::{KeyMaterial, KeyMaterialStore};
pub use rekey::{RekeyOptions, RekeyReport};
pub use session::SessionKeyCache;
pub use settings::{Settings, SettingsManager};
pub use storage::{FileBackend, KeyValueBackend, MemoryBackend};
pub use store::{is_reserved, MigrationReport, SecureStore};
