//! BLAKE3 content hashing.
//!
//! The hash of a source file becomes the `version` of every record built
//! from it.

/// Compute the BLAKE3 hash of content, returning a hex string.
pub fn content_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        assert_eq!(content_hash(b"lesson one"), content_hash(b"lesson one"));
        assert_ne!(content_hash(b"lesson one"), content_hash(b"lesson one!"));
    }

    #[test]
    fn test_known_hash() {
        assert_eq!(
            content_hash(b""),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }
}
