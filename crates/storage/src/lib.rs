//! Storage unit: the versioned state store behind block execution.
//!
//! State is modelled as one digest per execution lane. Applying a
//! transaction folds its digest into every lane it touches, so transactions
//! with disjoint shard masks commute and the state reached at the end of a
//! slice is independent of dispatch order within the slice.
//!
//! Versions are keyed by `(merkle_hash, block_number)`. [`StorageUnit::commit`]
//! snapshots the current lanes under the current hash; [`StorageUnit::revert_to_hash`]
//! restores a snapshot and is idempotent. The version for
//! [`GENESIS_MERKLE_ROOT`] at block 0 is always present.

use meridian_types::{Digest, ShardMask, GENESIS_MERKLE_ROOT};
use parking_lot::RwLock;
use sha2::{Digest as _, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

mod error;

pub use error::StorageError;

/// Interface the coordinator and executors hold onto the state store.
pub trait StorageUnit: Send + Sync {
    /// Digest of the live (possibly uncommitted) state.
    fn current_hash(&self) -> Digest;

    /// Digest installed by the most recent commit.
    fn last_commit_hash(&self) -> Digest;

    /// Whether a version exists for `(hash, block_number)`.
    fn hash_exists(&self, hash: &Digest, block_number: u64) -> bool;

    /// Restore the state stored under `(hash, block_number)`.
    ///
    /// Returns `false` when no such version exists; the live state is then
    /// left untouched. Reverting to the current version is a no-op.
    fn revert_to_hash(&self, hash: &Digest, block_number: u64) -> bool;

    /// Install the current state as the version for `block_number`.
    fn commit(&self, block_number: u64);

    /// Whether the transaction payload has been synchronised locally.
    fn has_transaction(&self, digest: &Digest) -> bool;

    /// Record a synchronised transaction payload.
    fn store_transaction(&self, digest: Digest);

    /// Fold a transaction into the lanes its shard mask declares.
    fn apply_transaction(&self, digest: &Digest, lanes: &ShardMask) -> Result<(), StorageError>;
}

struct StorageInner {
    lanes: Vec<Digest>,
    versions: HashMap<(Digest, u64), Vec<Digest>>,
    last_commit: Digest,
    transactions: HashSet<Digest>,
}

impl StorageInner {
    fn state_hash(lanes: &[Digest]) -> Digest {
        if lanes.iter().all(Digest::is_zero) {
            return GENESIS_MERKLE_ROOT;
        }
        let mut hasher = Sha256::new();
        for lane in lanes {
            hasher.update(lane.as_bytes());
        }
        Digest::new(hasher.finalize().into())
    }
}

/// In-memory storage unit.
pub struct InMemoryStorageUnit {
    inner: RwLock<StorageInner>,
}

impl InMemoryStorageUnit {
    /// Create a fresh store over `num_lanes` lanes, seeded with the genesis
    /// version.
    pub fn new(num_lanes: u32) -> Self {
        let lanes = vec![Digest::ZERO; num_lanes as usize];
        let mut versions = HashMap::new();
        versions.insert((GENESIS_MERKLE_ROOT, 0), lanes.clone());
        Self {
            inner: RwLock::new(StorageInner {
                lanes,
                versions,
                last_commit: GENESIS_MERKLE_ROOT,
                transactions: HashSet::new(),
            }),
        }
    }

    /// Number of stored versions, the genesis version included.
    pub fn version_count(&self) -> usize {
        self.inner.read().versions.len()
    }
}

impl StorageUnit for InMemoryStorageUnit {
    fn current_hash(&self) -> Digest {
        StorageInner::state_hash(&self.inner.read().lanes)
    }

    fn last_commit_hash(&self) -> Digest {
        self.inner.read().last_commit
    }

    fn hash_exists(&self, hash: &Digest, block_number: u64) -> bool {
        self.inner
            .read()
            .versions
            .contains_key(&(*hash, block_number))
    }

    fn revert_to_hash(&self, hash: &Digest, block_number: u64) -> bool {
        let mut inner = self.inner.write();
        match inner.versions.get(&(*hash, block_number)) {
            Some(lanes) => {
                let lanes = lanes.clone();
                inner.lanes = lanes;
                debug!(%hash, block_number, "Reverted state");
                true
            }
            None => {
                warn!(%hash, block_number, "Revert requested for unknown state version");
                false
            }
        }
    }

    fn commit(&self, block_number: u64) {
        let mut inner = self.inner.write();
        let hash = StorageInner::state_hash(&inner.lanes);
        let lanes = inner.lanes.clone();
        inner.versions.insert((hash, block_number), lanes);
        inner.last_commit = hash;
        debug!(%hash, block_number, "Committed state");
    }

    fn has_transaction(&self, digest: &Digest) -> bool {
        self.inner.read().transactions.contains(digest)
    }

    fn store_transaction(&self, digest: Digest) {
        self.inner.write().transactions.insert(digest);
    }

    fn apply_transaction(&self, digest: &Digest, lanes: &ShardMask) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if !inner.transactions.contains(digest) {
            return Err(StorageError::TransactionUnavailable(*digest));
        }
        let lane_count = inner.lanes.len() as u32;
        for lane in lanes.lanes() {
            if lane >= lane_count {
                return Err(StorageError::LaneOutOfRange {
                    lane,
                    num_lanes: lane_count,
                });
            }
            let current = inner.lanes[lane as usize];
            let mut preimage = Vec::with_capacity(Digest::LENGTH * 2);
            preimage.extend_from_slice(current.as_bytes());
            preimage.extend_from_slice(digest.as_bytes());
            inner.lanes[lane as usize] = Digest::hash_of(&preimage);
        }
        Ok(())
    }
}
