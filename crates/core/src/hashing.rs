//! Shared SHA-256 helpers.
//!
//! Used for latent digests in run reports and for deriving deterministic
//! seeds from prompt text.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Derive a stable 64-bit seed from arbitrary text.
pub fn seed_from_text(text: &str) -> u64 {
    let hash = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn seed_is_stable_and_text_sensitive() {
        assert_eq!(seed_from_text("a cat"), seed_from_text("a cat"));
        assert_ne!(seed_from_text("a cat"), seed_from_text("a dog"));
    }
}
