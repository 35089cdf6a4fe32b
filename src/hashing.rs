/// Object identity generation
///
/// Hashes minted here are identifiers, not content digests: the same file
/// uploaded twice gets two different hashes.
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of an object hash (hex-encoded SHA-256)
pub const OBJECT_HASH_LEN: usize = 64;

/// Length of a short identifier (tenant hashes)
pub const SHORT_HASH_LEN: usize = 16;

/// Generate a fresh 64-hex-char object hash from a seed (usually the original filename)
pub fn new_hash(seed: &str) -> String {
    hex::encode(salted_digest(seed))
}

/// Generate a 16-hex-char identifier for contexts that need compact IDs
pub fn short_hash(seed: &str) -> String {
    let digest = salted_digest(seed);
    hex::encode(&digest[..SHORT_HASH_LEN / 2])
}

/// Check that a string is a canonical object hash (64 lowercase hex chars)
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == OBJECT_HASH_LEN && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Check that a string is a canonical short hash (16 lowercase hex chars)
pub fn is_valid_short_hash(hash: &str) -> bool {
    hash.len() == SHORT_HASH_LEN && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn salted_digest(seed: &str) -> [u8; 32] {
    let mut entropy = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut entropy);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(nanos.to_be_bytes());
    hasher.update(entropy);
    hasher.finalize().into()
}
