// src/hash.rs

//! Content hashing for uploaded artifacts
//!
//! Uploads are buffered once. While the bytes arrive, a [`ContentDigest`]
//! accumulates the SHA-256 state and the running length, so the hash that
//! ends up in the catalog is computed over exactly the bytes that are sent to
//! the object store.

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Digest computation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// More bytes were fed than the configured limit allows
    LimitExceeded { limit: u64 },
}

impl fmt::Display for DigestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded { limit } => write!(f, "content exceeds {} bytes", limit),
        }
    }
}

impl std::error::Error for DigestError {}

/// Incremental SHA-256 digest that also buffers and measures the content
pub struct ContentDigest {
    hasher: Sha256,
    buffer: BytesMut,
    limit: Option<u64>,
}

impl ContentDigest {
    /// Create a digest with no size limit
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            buffer: BytesMut::new(),
            limit: None,
        }
    }

    /// Create a digest that rejects content larger than `limit` bytes
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Feed a chunk of content
    pub fn update(&mut self, chunk: &[u8]) -> Result<(), DigestError> {
        if let Some(limit) = self.limit
            && self.buffer.len() as u64 + chunk.len() as u64 > limit
        {
            return Err(DigestError::LimitExceeded { limit });
        }
        self.hasher.update(chunk);
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Bytes consumed so far
    pub fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Finish hashing, returning the buffered content and its hex digest
    pub fn finish(self) -> DigestedContent {
        DigestedContent {
            hash: hex::encode(self.hasher.finalize()),
            bytes: self.buffer.freeze(),
        }
    }
}

impl Default for ContentDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Content together with its SHA-256 digest
#[derive(Debug, Clone)]
pub struct DigestedContent {
    /// Lowercase hex SHA-256
    pub hash: String,
    /// The exact bytes that were hashed
    pub bytes: Bytes,
}

impl DigestedContent {
    /// Digest an already-buffered payload in one pass
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            hash: sha256_hex(&bytes),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Compute the lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Validate hash format (64 hex chars for SHA-256)
pub fn is_valid_sha256_hex(hash: &str) -> bool {
    hash.len() == SHA256_HEX_LEN && hash.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-256("hello world")
    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(sha256_hex(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut digest = ContentDigest::new();
        digest.update(b"hello ").unwrap();
        digest.update(b"world").unwrap();
        assert_eq!(digest.len(), 11);

        let content = digest.finish();
        assert_eq!(content.hash, HELLO_WORLD);
        assert_eq!(&content.bytes[..], b"hello world");
        assert_eq!(content.hash, DigestedContent::from_bytes(content.bytes.clone()).hash);
    }

    #[test]
    fn test_limit_enforced() {
        let mut digest = ContentDigest::with_limit(8);
        digest.update(b"1234").unwrap();
        digest.update(b"5678").unwrap();
        assert_eq!(
            digest.update(b"9"),
            Err(DigestError::LimitExceeded { limit: 8 })
        );
        // Rejected chunk is not buffered
        assert_eq!(digest.len(), 8);
    }

    #[test]
    fn test_is_valid_sha256_hex() {
        assert!(is_valid_sha256_hex(HELLO_WORLD));
        assert!(!is_valid_sha256_hex("abc"));
        assert!(!is_valid_sha256_hex(&"g".repeat(64)));
    }
}
