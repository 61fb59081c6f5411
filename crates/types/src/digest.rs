//! Fixed-length digests identifying blocks, transactions and state versions.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sentinel digest marking "nothing": the parent of genesis, and the
/// execution manager's record before any block has been processed.
pub const GENESIS_DIGEST: Digest = Digest::ZERO;

/// State version of a freshly initialised storage unit (block number 0).
pub const GENESIS_MERKLE_ROOT: Digest = Digest::ZERO;

/// Errors from parsing a digest out of a hex string.
#[derive(Debug, Error)]
pub enum HexError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// A 32-byte identifier for blocks, transactions and merkle roots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    /// Length of a digest in bytes.
    pub const LENGTH: usize = 32;

    /// The all-zero digest.
    pub const ZERO: Digest = Digest([0u8; Digest::LENGTH]);

    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; Digest::LENGTH]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of arbitrary input.
    pub fn hash_of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Access the raw bytes.
    pub fn as_bytes(&self) -> &[u8; Digest::LENGTH] {
        &self.0
    }

    /// Whether this is the zero digest.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Number of leading zero bits, the proof-of-work score.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; Digest::LENGTH]> for Digest {
    fn from(bytes: [u8; Digest::LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncated form keeps log lines readable.
        write!(f, "{}..", hex::encode(&self.0[..4]))
    }
}

impl FromStr for Digest {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let actual = bytes.len();
        let bytes: [u8; Digest::LENGTH] =
            bytes.try_into().map_err(|_| HexError::WrongLength {
                expected: Digest::LENGTH,
                actual,
            })?;
        Ok(Self(bytes))
    }
}
