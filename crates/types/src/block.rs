//! Blocks, slices and the proof-of-work seal.

use crate::{Digest, Identity, TransactionSummary, GENESIS_DIGEST};
use sha2::{Digest as _, Sha256};

/// An ordered group of transactions whose effects commute modulo their
/// shard masks. The state at the end of slice `i` is the precondition for
/// slice `i + 1`.
pub type Slice = Vec<TransactionSummary>;

/// Proof-of-work seal: a difficulty target and the nonce that meets it.
///
/// The predicate is over the block's own digest: a proof is satisfied when
/// the digest carries at least `target` leading zero bits.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ProofOfWork {
    target: u64,
    nonce: u64,
}

impl ProofOfWork {
    /// Set the difficulty target (required leading zero bits).
    pub fn set_target(&mut self, target: u64) {
        self.target = target;
    }

    /// The difficulty target.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// The current nonce.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Replace the nonce.
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    /// Step the nonce to the next candidate.
    pub fn advance(&mut self) {
        self.nonce = self.nonce.wrapping_add(1);
    }

    /// Whether `score` meets the difficulty target.
    pub fn is_satisfied_by(&self, score: &Digest) -> bool {
        u64::from(score.leading_zero_bits()) >= self.target
    }
}

/// A sealed unit of state transition.
///
/// Immutable once sealed: `hash` covers every other field, including the
/// proof, and is recomputed with [`Block::update_digest`] after mining.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    /// Digest of the sealed block.
    pub hash: Digest,
    /// Digest of the parent block; [`GENESIS_DIGEST`] iff this is genesis.
    pub previous_hash: Digest,
    /// Strictly `parent.block_number + 1`.
    pub block_number: u64,
    /// Identity of the miner that sealed the block.
    pub miner: Identity,
    /// Digest of the post-execution state.
    pub merkle_hash: Digest,
    /// `num_lanes == 1 << log2_num_lanes`.
    pub log2_num_lanes: u8,
    /// Transaction slices, executed in order.
    pub slices: Vec<Slice>,
    /// Proof-of-work seal.
    pub proof: ProofOfWork,
}

impl Block {
    /// The genesis block: every digest zero, no slices, no proof.
    ///
    /// Its hash is [`GENESIS_DIGEST`] by definition rather than computed,
    /// so an untouched node reports genesis as both its current block and
    /// its last processed block.
    pub fn genesis() -> Self {
        Self {
            hash: GENESIS_DIGEST,
            previous_hash: GENESIS_DIGEST,
            block_number: 0,
            miner: Identity::default(),
            merkle_hash: GENESIS_DIGEST,
            log2_num_lanes: 0,
            slices: Vec::new(),
            proof: ProofOfWork::default(),
        }
    }

    /// Whether this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_DIGEST && self.block_number == 0
    }

    /// Number of lanes the block was packed for.
    pub fn num_lanes(&self) -> u32 {
        1u32 << self.log2_num_lanes
    }

    /// Total number of transactions across all slices.
    pub fn transaction_count(&self) -> usize {
        self.slices.iter().map(Vec::len).sum()
    }

    /// Iterate over every transaction digest in slice order.
    pub fn tx_digests(&self) -> impl Iterator<Item = &Digest> {
        self.slices
            .iter()
            .flat_map(|slice| slice.iter().map(|tx| &tx.transaction_hash))
    }

    /// Digest of the block body plus proof.
    ///
    /// During proof search the nonce varies and the candidate digest is
    /// scored against the proof target; the winning digest becomes the
    /// block hash via [`Block::update_digest`].
    pub fn candidate_digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.block_number.to_le_bytes());
        hasher.update((self.miner.len() as u64).to_le_bytes());
        hasher.update(self.miner.as_bytes());
        hasher.update(self.merkle_hash.as_bytes());
        hasher.update([self.log2_num_lanes]);
        hasher.update((self.slices.len() as u64).to_le_bytes());
        for slice in &self.slices {
            hasher.update((slice.len() as u64).to_le_bytes());
            for tx in slice {
                hasher.update(tx.transaction_hash.as_bytes());
                for lane in tx.shard_mask.lanes() {
                    hasher.update(lane.to_le_bytes());
                }
            }
        }
        hasher.update(self.proof.target().to_le_bytes());
        hasher.update(self.proof.nonce().to_le_bytes());
        Digest::new(hasher.finalize().into())
    }

    /// Recompute and install the block hash from body and proof.
    pub fn update_digest(&mut self) {
        self.hash = self.candidate_digest();
    }
}
