//! Byte, base64 and JSON transforms used by the persisted formats

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Encode raw bytes as standard (padded) base64 text
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 text into bytes
pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| StoreError::Format(format!("Invalid base64: {}", e)))
}

/// Serialize a value into compact JSON bytes
pub fn to_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Parse JSON bytes into a typed value
pub fn from_json_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Format(format!("Invalid JSON: {}", e)))
}

/// Best-effort parse of a legacy plaintext value.
///
/// Legacy writers stored `JSON.stringify`-style text, but some wrote bare
/// strings. Anything that does not parse is kept as a JSON string.
pub fn parse_lenient(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
