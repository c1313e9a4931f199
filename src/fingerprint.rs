use sha2::{Digest, Sha256};

/// Hex SHA-256 of the UTF-8 bytes of `content`.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn matches(content: &str, expected_hash: &str) -> bool {
    fingerprint(content).eq_ignore_ascii_case(expected_hash)
}
