//! Queue-backed block packer.

use meridian_chain::MainChain;
use meridian_coordinator::{BlockPacker, PackError};
use meridian_types::{Block, Digest, ShardMask, TransactionLayout};
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, warn};

struct PackerInner {
    queue: Vec<TransactionLayout>,
    seen: HashSet<Digest>,
}

/// Packs queued transaction layouts into block slices.
///
/// Candidates are taken in descending charge order and placed greedily into
/// the first slice whose occupied lanes do not overlap the candidate's
/// mask. This keeps every slice internally lane-disjoint, which is the
/// precondition the execution manager's parallel dispatch relies on.
/// Transactions that do not fit stay queued for the next block; expired
/// ones are dropped.
pub struct QueueBlockPacker {
    inner: Mutex<PackerInner>,
}

impl QueueBlockPacker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PackerInner {
                queue: Vec::new(),
                seen: HashSet::new(),
            }),
        }
    }

    /// Queue a transaction for inclusion. Duplicates are dropped.
    pub fn add(&self, layout: TransactionLayout) {
        let mut inner = self.inner.lock();
        if inner.seen.insert(*layout.digest()) {
            inner.queue.push(layout);
        }
    }

    /// Number of transactions waiting to be packed.
    pub fn backlog(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl Default for QueueBlockPacker {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockPacker for QueueBlockPacker {
    fn generate_block(
        &self,
        block: &mut Block,
        num_lanes: u32,
        num_slices: usize,
        _chain: &MainChain,
    ) -> Result<(), PackError> {
        let mut inner = self.inner.lock();

        // Highest charge first; equal charges keep submission order.
        inner.queue.sort_by(|a, b| b.charge().cmp(&a.charge()));

        let mut slices = vec![Vec::new(); num_slices];
        let mut occupied = vec![ShardMask::all_clear(num_lanes); num_slices];
        let mut unplaced = Vec::new();
        let mut expired = Vec::new();

        for layout in inner.queue.drain(..) {
            if block.block_number > layout.valid_until() {
                expired.push(*layout.digest());
                continue;
            }
            if !layout.is_valid_at(block.block_number) {
                // Not yet valid; hold for a later block.
                unplaced.push(layout);
                continue;
            }
            if layout.mask().lanes().any(|lane| lane >= num_lanes) {
                warn!(tx = ?layout.digest(), "Dropping transaction with out-of-range lanes");
                expired.push(*layout.digest());
                continue;
            }

            match occupied
                .iter_mut()
                .zip(slices.iter_mut())
                .find(|(mask, _)| !mask.overlaps(layout.mask()))
            {
                Some((mask, slice)) => {
                    mask.union_with(layout.mask());
                    slice.push(layout.to_summary());
                }
                None => unplaced.push(layout),
            }
        }

        for digest in expired {
            inner.seen.remove(&digest);
        }
        inner.queue = unplaced;

        let packed: usize = slices.iter().map(Vec::len).sum();
        debug!(
            packed,
            backlog = inner.queue.len(),
            number = block.block_number,
            "Packed new block"
        );

        block.slices = slices;
        Ok(())
    }
}
