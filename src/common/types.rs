//! Shared type definitions for the bingo engine
//!
//! Identifiers are opaque strings (UUID v4 for everything the engine mints).
//! Money is always an integer count of minor currency units.

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type GameId = String;
pub type CardId = String;
pub type UserId = String;

/// Minor currency units; balances and prize amounts are never fractional
pub type Amount = u64;

/// Mint a fresh identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Convert bytes to hexadecimal string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Convert hexadecimal string to bytes
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(hex_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_sha256_concatenates_parts() {
        assert_eq!(sha256(&[b"ab", b"c"]), sha256(&[b"abc"]));
        assert_ne!(sha256(&[b"abc"]), sha256(&[b"abd"]));
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        let encoded = bytes_to_hex(&bytes);
        assert_eq!(encoded, "deadbeef");
        assert_eq!(hex_to_bytes(&encoded).unwrap(), bytes.to_vec());
    }
}
