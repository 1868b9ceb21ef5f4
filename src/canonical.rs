//! Canonical serialization for batch fingerprints.
//!
//! Fingerprints identify a batch's membership independent of pagination
//! order, so callers must sort ids before hashing. Maps in hashed data must be
//! `BTreeMap`, never `HashMap`.

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
///
/// Values that cannot be represented as JSON hash as an empty buffer.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Compute the canonical xxh64 hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Canonical hash as a 16-char lowercase hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let ids = ("followers", vec![1_i64, 2, 3]);
        assert_eq!(canonical_hash(&ids), canonical_hash(&ids));
        assert_eq!(canonical_hash_hex(&ids).len(), 16);
    }

    #[test]
    fn test_order_sensitivity() {
        assert_ne!(canonical_hash(&vec![1_i64, 2]), canonical_hash(&vec![2_i64, 1]));
    }
}
