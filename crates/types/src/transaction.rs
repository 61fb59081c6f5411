//! Transaction views used by block bodies and the packer.

use crate::{Digest, ShardMask};

/// The per-transaction entry carried inside a block slice.
///
/// Only the digest and the lane usage survive into the sealed block; the
/// transaction payload itself lives in the storage unit.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransactionSummary {
    /// Digest of the transaction payload.
    pub transaction_hash: Digest,
    /// Lanes the transaction touches.
    pub shard_mask: ShardMask,
}

/// Summary of a transaction as seen by the block packer.
///
/// This minimal set of information is only useful for packing transactions
/// into blocks: the digest to reference, the lanes to schedule around, the
/// charge to order by, and the validity window to honour.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransactionLayout {
    digest: Digest,
    mask: ShardMask,
    charge: u64,
    valid_from: u64,
    valid_until: u64,
}

impl TransactionLayout {
    pub fn new(
        digest: Digest,
        mask: ShardMask,
        charge: u64,
        valid_from: u64,
        valid_until: u64,
    ) -> Self {
        Self {
            digest,
            mask,
            charge,
            valid_from,
            valid_until,
        }
    }

    /// The associated transaction digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The shard mask usage for this transaction.
    pub fn mask(&self) -> &ShardMask {
        &self.mask
    }

    /// The charge (fee) associated with the transaction.
    pub fn charge(&self) -> u64 {
        self.charge
    }

    /// The block index from which the transaction is valid.
    pub fn valid_from(&self) -> u64 {
        self.valid_from
    }

    /// The block index until which the transaction is valid.
    pub fn valid_until(&self) -> u64 {
        self.valid_until
    }

    /// Whether the transaction may be included at the given block number.
    pub fn is_valid_at(&self, block_number: u64) -> bool {
        block_number >= self.valid_from && block_number <= self.valid_until
    }

    /// Collapse into the summary carried by a block slice.
    pub fn to_summary(&self) -> TransactionSummary {
        TransactionSummary {
            transaction_hash: self.digest,
            shard_mask: self.mask.clone(),
        }
    }
}

/// Observed life-cycle status of a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TransactionStatus {
    /// Nothing known about the transaction.
    #[default]
    Unknown,
    /// Accepted locally, not yet part of an executed block.
    Pending,
    /// Part of a block whose execution has completed and been committed.
    Executed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_window() {
        let layout = TransactionLayout::new(
            Digest::hash_of(b"tx"),
            ShardMask::from_lanes([0], 4),
            10,
            5,
            8,
        );
        assert!(!layout.is_valid_at(4));
        assert!(layout.is_valid_at(5));
        assert!(layout.is_valid_at(8));
        assert!(!layout.is_valid_at(9));
    }
}
