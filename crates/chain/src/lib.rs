//! Main chain: the block DAG and heaviest-tip selection.
//!
//! The chain stores every accepted block keyed by digest, tracks cumulative
//! proof weight per tip, and answers the two queries the block coordinator
//! synchronises against: the current heaviest block and the path from a tip
//! back to the common ancestor of two branches.
//!
//! The chain is internally synchronised; it is one of several structures the
//! coordinator shares with other subsystems.

use meridian_types::{Block, Digest};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of offering a block to the chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockStatus {
    /// The block was accepted and linked to its parent.
    Added,
    /// The block is already present.
    Duplicate,
    /// The block's parent is unknown; the block was not stored.
    Loose,
    /// The block is malformed relative to its parent.
    Invalid,
}

struct ChainInner {
    blocks: HashMap<Digest, Arc<Block>>,
    children: HashMap<Digest, Vec<Digest>>,
    /// Cumulative proof weight from genesis, per block.
    weights: HashMap<Digest, u128>,
    heaviest: Digest,
}

impl ChainInner {
    fn weight_of(&self, hash: &Digest) -> u128 {
        self.weights.get(hash).copied().unwrap_or(0)
    }

    /// Re-derive the heaviest tip by scanning all stored blocks.
    ///
    /// Ties break toward the lexicographically greater hash so that every
    /// node resolves equal-weight forks identically.
    fn recompute_heaviest(&mut self) {
        let mut best = Digest::ZERO;
        let mut best_weight = 0u128;
        for (hash, _) in self.blocks.iter() {
            let weight = self.weight_of(hash);
            if weight > best_weight || (weight == best_weight && *hash > best) {
                best = *hash;
                best_weight = weight;
            }
        }
        self.heaviest = best;
    }
}

/// The block DAG.
pub struct MainChain {
    inner: RwLock<ChainInner>,
}

impl MainChain {
    /// Create a chain holding only the genesis block.
    pub fn new() -> Self {
        let genesis = Arc::new(Block::genesis());
        let genesis_hash = genesis.hash;

        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, genesis);

        let mut weights = HashMap::new();
        weights.insert(genesis_hash, 0);

        Self {
            inner: RwLock::new(ChainInner {
                blocks,
                children: HashMap::new(),
                weights,
                heaviest: genesis_hash,
            }),
        }
    }

    /// The block the chain currently considers canonical.
    pub fn heaviest_block(&self) -> Arc<Block> {
        let inner = self.inner.read();
        Arc::clone(&inner.blocks[&inner.heaviest])
    }

    /// Digest of the heaviest block.
    pub fn heaviest_block_hash(&self) -> Digest {
        self.inner.read().heaviest
    }

    /// Look up a block by digest.
    pub fn get_block(&self, hash: &Digest) -> Option<Arc<Block>> {
        self.inner.read().blocks.get(hash).cloned()
    }

    /// Number of blocks stored, genesis included.
    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// Whether only genesis is stored.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Offer a block to the chain.
    ///
    /// A block is accepted only when its parent is present and the block
    /// number is contiguous. Accepting a block may move the heaviest tip;
    /// each block contributes `proof.target + 1` weight so that, at equal
    /// difficulty, longer chains win.
    pub fn add_block(&self, block: Block) -> BlockStatus {
        let mut inner = self.inner.write();

        if inner.blocks.contains_key(&block.hash) {
            return BlockStatus::Duplicate;
        }
        if block.hash.is_zero() {
            warn!("Rejecting block with unset digest");
            return BlockStatus::Invalid;
        }

        let parent_number = match inner.blocks.get(&block.previous_hash) {
            Some(parent) => parent.block_number,
            None => {
                debug!(block = ?block.hash, parent = ?block.previous_hash, "Loose block");
                return BlockStatus::Loose;
            }
        };
        if block.block_number != parent_number + 1 {
            warn!(
                block = ?block.hash,
                number = block.block_number,
                parent_number,
                "Rejecting block with discontinuous number"
            );
            return BlockStatus::Invalid;
        }

        let hash = block.hash;
        let previous_hash = block.previous_hash;
        let weight = inner.weight_of(&previous_hash) + u128::from(block.proof.target()) + 1;

        inner.blocks.insert(hash, Arc::new(block));
        inner.children.entry(previous_hash).or_default().push(hash);
        inner.weights.insert(hash, weight);

        let heaviest = inner.heaviest;
        if weight > inner.weight_of(&heaviest)
            || (weight == inner.weight_of(&heaviest) && hash > heaviest)
        {
            inner.heaviest = hash;
        }

        debug!(block = ?hash, weight, "Block added to chain");
        BlockStatus::Added
    }

    /// Remove a block and every descendant, then re-derive the heaviest tip.
    ///
    /// Genesis cannot be removed. Removing an unknown digest is a no-op.
    pub fn remove_block(&self, hash: &Digest) {
        let mut inner = self.inner.write();

        if hash.is_zero() || !inner.blocks.contains_key(hash) {
            return;
        }

        let mut doomed: HashSet<Digest> = HashSet::new();
        let mut queue: VecDeque<Digest> = VecDeque::from([*hash]);
        while let Some(next) = queue.pop_front() {
            if doomed.insert(next) {
                if let Some(children) = inner.children.get(&next) {
                    queue.extend(children.iter().copied());
                }
            }
        }

        for gone in &doomed {
            inner.blocks.remove(gone);
            inner.weights.remove(gone);
            inner.children.remove(gone);
        }
        for children in inner.children.values_mut() {
            children.retain(|child| !doomed.contains(child));
        }

        warn!(block = ?hash, evicted = doomed.len(), "Removed block subtree from chain");
        inner.recompute_heaviest();
    }

    /// The path from `from` back to the common ancestor of `from` and `to`,
    /// ordered tip first and inclusive on both ends.
    ///
    /// For distinct blocks on the same chain the path has at least two
    /// entries. Returns `None` when either endpoint (or any block along the
    /// walk) is missing from the chain.
    pub fn path_to_common_ancestor(&self, from: &Digest, to: &Digest) -> Option<Vec<Arc<Block>>> {
        let inner = self.inner.read();

        let mut left = inner.blocks.get(from).cloned()?;
        let mut right = inner.blocks.get(to).cloned()?;
        let mut path = vec![Arc::clone(&left)];

        // Walk both branches up to the same height, recording the `from`
        // side, then step in lock-step until they meet.
        loop {
            if left.hash == right.hash {
                return Some(path);
            }
            if left.block_number >= right.block_number && !left.is_genesis() {
                left = inner.blocks.get(&left.previous_hash).cloned()?;
                path.push(Arc::clone(&left));
            } else if right.block_number > left.block_number && !right.is_genesis() {
                right = inner.blocks.get(&right.previous_hash).cloned()?;
            } else {
                // Both at genesis height yet different: disjoint histories.
                return None;
            }
        }
    }
}

impl Default for MainChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{Identity, ProofOfWork, GENESIS_DIGEST};

    fn child_of(parent: &Block, seed: u8, target: u64) -> Block {
        let mut proof = ProofOfWork::default();
        proof.set_target(target);
        proof.set_nonce(u64::from(seed));
        let mut block = Block {
            hash: Digest::ZERO,
            previous_hash: parent.hash,
            block_number: parent.block_number + 1,
            miner: Identity::from([seed; Identity::LENGTH]),
            merkle_hash: Digest::hash_of(&[seed]),
            log2_num_lanes: 2,
            slices: Vec::new(),
            proof,
        };
        block.update_digest();
        block
    }

    #[test]
    fn test_new_chain_has_genesis_tip() {
        let chain = MainChain::new();
        assert_eq!(chain.heaviest_block_hash(), GENESIS_DIGEST);
        assert!(chain.is_empty());
        assert!(chain.get_block(&GENESIS_DIGEST).unwrap().is_genesis());
    }

    #[test]
    fn test_add_block_statuses() {
        let chain = MainChain::new();
        let b1 = child_of(&Block::genesis(), 1, 0);

        assert_eq!(chain.add_block(b1.clone()), BlockStatus::Added);
        assert_eq!(chain.add_block(b1.clone()), BlockStatus::Duplicate);

        let orphan = child_of(&child_of(&b1, 9, 0), 2, 0);
        assert_eq!(chain.add_block(orphan), BlockStatus::Loose);

        let mut skipped = child_of(&b1, 3, 0);
        skipped.block_number += 1;
        skipped.update_digest();
        assert_eq!(chain.add_block(skipped), BlockStatus::Invalid);
    }

    #[test]
    fn test_longer_chain_is_heavier() {
        let chain = MainChain::new();
        let b1 = child_of(&Block::genesis(), 1, 0);
        let b2 = child_of(&b1, 2, 0);
        let fork1 = child_of(&Block::genesis(), 10, 0);

        chain.add_block(b1.clone());
        chain.add_block(fork1);
        chain.add_block(b2.clone());

        assert_eq!(chain.heaviest_block_hash(), b2.hash);
        assert_eq!(chain.heaviest_block().block_number, 2);
    }

    #[test]
    fn test_higher_difficulty_outweighs_length() {
        let chain = MainChain::new();
        let b1 = child_of(&Block::genesis(), 1, 0);
        let b2 = child_of(&b1, 2, 0);
        let heavy = child_of(&Block::genesis(), 9, 8);

        chain.add_block(b1);
        chain.add_block(b2);
        chain.add_block(heavy.clone());

        assert_eq!(chain.heaviest_block_hash(), heavy.hash);
    }

    #[test]
    fn test_path_to_common_ancestor_linear() {
        let chain = MainChain::new();
        let b1 = child_of(&Block::genesis(), 1, 0);
        let b2 = child_of(&b1, 2, 0);
        let b3 = child_of(&b2, 3, 0);
        for block in [&b1, &b2, &b3] {
            chain.add_block(block.clone());
        }

        let path = chain.path_to_common_ancestor(&b3.hash, &b1.hash).unwrap();
        let hashes: Vec<_> = path.iter().map(|b| b.hash).collect();
        assert_eq!(hashes, vec![b3.hash, b2.hash, b1.hash]);
    }

    #[test]
    fn test_path_to_common_ancestor_fork() {
        let chain = MainChain::new();
        let b1 = child_of(&Block::genesis(), 1, 0);
        let b2 = child_of(&b1, 2, 0);
        let b2f = child_of(&b1, 20, 0);
        let b3f = child_of(&b2f, 21, 0);
        for block in [&b1, &b2, &b2f, &b3f] {
            chain.add_block(block.clone());
        }

        let path = chain.path_to_common_ancestor(&b3f.hash, &b2.hash).unwrap();
        let hashes: Vec<_> = path.iter().map(|b| b.hash).collect();
        assert_eq!(hashes, vec![b3f.hash, b2f.hash, b1.hash]);
    }

    #[test]
    fn test_path_missing_block_is_none() {
        let chain = MainChain::new();
        let b1 = child_of(&Block::genesis(), 1, 0);
        chain.add_block(b1.clone());
        let unknown = Digest::hash_of(b"unknown");
        assert!(chain.path_to_common_ancestor(&b1.hash, &unknown).is_none());
        assert!(chain.path_to_common_ancestor(&unknown, &b1.hash).is_none());
    }

    #[test]
    fn test_remove_block_evicts_descendants() {
        let chain = MainChain::new();
        let b1 = child_of(&Block::genesis(), 1, 0);
        let b2 = child_of(&b1, 2, 0);
        let b3 = child_of(&b2, 3, 0);
        for block in [&b1, &b2, &b3] {
            chain.add_block(block.clone());
        }
        assert_eq!(chain.heaviest_block_hash(), b3.hash);

        chain.remove_block(&b2.hash);
        assert!(chain.get_block(&b2.hash).is_none());
        assert!(chain.get_block(&b3.hash).is_none());
        assert_eq!(chain.heaviest_block_hash(), b1.hash);

        // Genesis is never removable.
        chain.remove_block(&GENESIS_DIGEST);
        assert!(chain.get_block(&GENESIS_DIGEST).is_some());
    }
}
