//! Redaction helpers.
//!
//! Logs and telemetry only ever see these hashes, never the text itself.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from a SHA-256 digest.
const SHORT_HASH_LEN: usize = 16;

/// Stable short hash of a SQL string.
pub fn sql_hash(sql: &str) -> String {
    short_hash(&[sql.as_bytes()])
}

/// Stable short hash of a tenant identifier.
pub fn tenant_hash(tenant_id: &str) -> String {
    short_hash(&[b"tenant:", tenant_id.as_bytes()])
}

/// Hash a sequence of parts with length prefixes so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn short_hash(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..SHORT_HASH_LEN].to_string()
}
