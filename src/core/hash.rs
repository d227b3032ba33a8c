use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a SHA-256 digest in bytes.
pub const HASH_LENGTH: usize = 32;

type HashValue = [u8; HASH_LENGTH];

#[derive(Error, Debug, PartialEq)]
pub enum HashParseError {
    #[error("Content hash must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Content hash is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

///
/// SHA-256 digest identifying a file's bytes. Primary key of the content registry.
///
/// Serialized as a lowercase hex string on every wire and in every snapshot.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash {
    value: HashValue,
}

impl ContentHash {
    /// Hash a complete in-memory buffer.
    pub fn from_input(input: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(input);
        Self::from_hasher(hasher)
    }

    /// Finalize an incremental hasher (used for streamed files).
    pub fn from_hasher(hasher: Sha256) -> Self {
        let mut value: HashValue = [0u8; HASH_LENGTH];
        value.copy_from_slice(&hasher.finalize());
        ContentHash { value }
    }

    /// Parse a hex string. Upper and lower case are both accepted.
    pub fn from_hex_str(s: &str) -> Result<Self, HashParseError> {
        let s = s.trim();
        if s.len() != HASH_LENGTH * 2 {
            return Err(HashParseError::InvalidLength {
                expected: HASH_LENGTH * 2,
                actual: s.len(),
            });
        }
        let mut value: HashValue = [0u8; HASH_LENGTH];
        hex::decode_to_slice(s, &mut value)?;
        Ok(ContentHash { value })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.value {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for ContentHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentHash::from_hex_str(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HashParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ContentHash::from_hex_str(&s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}
