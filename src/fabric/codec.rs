//! JSON payload encoding helpers

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode `value` as a UTF-8 JSON payload
///
/// # Errors
///
/// Returns error if `value` cannot be serialized
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Decode a UTF-8 JSON payload
///
/// # Errors
///
/// Returns error if the payload is not valid UTF-8 JSON of the expected shape
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Decode a payload as text, replacing invalid UTF-8 sequences
#[must_use]
pub fn decode_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
