//! Error types for secure-store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types
///
/// `Environment` and `NotReady` are precondition failures and always reach the
/// caller. `Integrity` and `Format` are data-quality failures; the store facade
/// absorbs them on reads and reports the entry as missing.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Environment unavailable: {0}")]
    Environment(String),

    #[error("Store is locked - set an encryption passphrase first")]
    NotReady,

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Unrecognized stored value: {0}")]
    Format(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Key is reserved for store bookkeeping: {0}")]
    ReservedKey(String),

    #[error("Re-key incomplete: {count} of {total} entries rewritten, failed at '{failed_key}': {source}", count = .rewritten.len())]
    RekeyIncomplete {
        /// Entries already rewritten under the new key
        rewritten: Vec<String>,
        /// Entry whose rewrite failed
        failed_key: String,
        /// Number of snapshotted entries
        total: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error describes unreadable data rather than a broken precondition
    pub fn is_data_quality(&self) -> bool {
        matches!(self, StoreError::Integrity(_) | StoreError::Format(_))
    }
}
