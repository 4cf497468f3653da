//! # Hashing Utilities
//!
//! BLAKE3 is the only hash the bridge needs: address derivation, payload
//! digests for the failed-message table, and packet identifiers. It is fast
//! everywhere and the digests are 32 bytes, which keeps the wire format
//! uniform.

/// Compute the BLAKE3 hash of the input data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash several byte slices as if they were concatenated.
///
/// Avoids allocating a temporary buffer when the preimage is assembled from
/// fields that already live in separate buffers.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Hex-encoded BLAKE3 digest, for logs and JSON output.
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3_hash(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_matches_concatenation() {
        let joined = blake3_hash(b"omniwrap-bridge");
        let parts = blake3_hash_multi(&[b"omniwrap", b"-", b"bridge"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn hex_digest_is_64_chars() {
        assert_eq!(blake3_hex(b"payload").len(), 64);
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(blake3_hash(b"a"), blake3_hash(b"b"));
    }
}
