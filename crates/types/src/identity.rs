//! Miner identities.

use std::fmt;

/// An opaque miner identifier.
///
/// Well-formed identities are exactly [`Identity::LENGTH`] bytes. The type
/// stores arbitrary bytes so that blocks received from untrusted sources can
/// be represented and then rejected by validation.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Identity {
    bytes: Vec<u8>,
}

impl Identity {
    /// Length of a well-formed identity in bytes.
    pub const LENGTH: usize = 64;

    /// Wrap raw identity bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Access the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes in the identity.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the identity holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the identity has the expected length.
    pub fn is_well_formed(&self) -> bool {
        self.bytes.len() == Self::LENGTH
    }
}

impl From<[u8; Identity::LENGTH]> for Identity {
    fn from(bytes: [u8; Identity::LENGTH]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.bytes.len().min(4);
        write!(f, "Identity({}..)", hex::encode(&self.bytes[..shown]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_length() {
        assert!(Identity::from([7u8; Identity::LENGTH]).is_well_formed());
        assert!(!Identity::new(vec![7u8; 32]).is_well_formed());
        assert!(!Identity::default().is_well_formed());
    }
}
