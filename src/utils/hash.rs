use sha2::{Digest, Sha256};

pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Client checksums arrive as hex in either case.
pub fn checksums_match(declared: &str, computed: &str) -> bool {
    declared.trim().eq_ignore_ascii_case(computed)
}
