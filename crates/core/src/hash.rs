//! Blob hash types and utilities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use std::fmt;

/// A SHA-384 blob hash represented as 48 bytes.
///
/// Archives are addressed by this digest end to end: clients declare it on
/// upload, the blob store verifies it as bytes arrive, and the serve path
/// echoes it back in the `ContentHash` response header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobHash([u8; 48]);

impl Serialize for BlobHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlobHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BlobHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl BlobHash {
    /// Create a new BlobHash from raw bytes.
    pub fn from_bytes(bytes: [u8; 48]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }

    /// Compute the SHA-384 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha384::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> BlobHasher {
        BlobHasher(Sha384::new())
    }

    /// Parse from a 96-character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 96 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 96 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 48];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-384 hasher.
pub struct BlobHasher(Sha384);

impl BlobHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> BlobHash {
        BlobHash(self.0.finalize().into())
    }
}
