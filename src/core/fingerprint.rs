//! Content-addressable cache keys

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Version folded into every key; bump to invalidate persisted entries
pub const SCHEMA_VERSION: &str = "1";

/// Hex SHA-256 of arbitrary bytes
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of the canonical JSON form of `payload`
///
/// `serde_json::Map` keeps keys ordered, so equal payloads serialize to equal
/// bytes regardless of construction order.
pub fn fingerprint(payload: &Value) -> String {
    let canonical = payload.to_string();
    sha256_hex(canonical.as_bytes())
}

/// Round a coordinate to 1e-6 degree
///
/// Negative zero is folded into zero so both serialize identically.
pub fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6 + 0.0
}

/// Digest of an auth token, empty when anonymous
pub fn token_digest(token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => sha256_hex(t.as_bytes()),
        _ => String::new(),
    }
}
