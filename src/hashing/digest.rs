//! Digests and the incremental hasher abstraction

use sha2::{Digest as _, Sha256};

/// Size of every digest, in bytes
pub const DIGEST_LEN: usize = 32;

/// Fixed-size fingerprint of a body or URL
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex digest (case-insensitive)
    pub fn from_hex(encoded: &str) -> Result<Self, DigestError> {
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(encoded.trim(), &mut bytes)
            .map_err(|e| DigestError(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Malformed hex digest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DigestError(String);

/// Hasher fed one chunk at a time
///
/// `Default` yields a fresh hasher with no input, so finalizing it gives
/// the well-defined digest of zero bytes.
pub trait IncrementalHasher: Default {
    fn update(&mut self, bytes: &[u8]);
    fn finalize(self) -> Digest;
}

/// Digest of a complete input in one call
pub fn digest_of<H: IncrementalHasher>(bytes: &[u8]) -> Digest {
    let mut hasher = H::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// SHA-256 implementation used by the filter
#[derive(Clone, Default)]
pub struct Sha256Hasher {
    inner: Sha256,
}

impl IncrementalHasher for Sha256Hasher {
    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}
