use sha2::{Digest, Sha256};

/// Length of a hex-encoded content hash.
pub const HASH_HEX_LEN: usize = 64;

/// Compute the SHA-256 fingerprint of a complete upload, hex encoded.
///
/// This is the dedup key: equal bytes always produce the same hash,
/// whatever the file is called or declared as.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
