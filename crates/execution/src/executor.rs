//! The executor seam: applying one transaction to the state store.

use meridian_storage::{StorageError, StorageUnit};
use meridian_types::{Digest, ShardMask};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Errors from executing a single transaction.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The transaction payload has not been synchronised locally.
    #[error("Transaction {0} is not available for execution")]
    TransactionUnavailable(Digest),

    /// The transaction could not be applied.
    #[error("Execution failed: {0}")]
    Failed(String),
}

/// A worker-owned transaction executor.
///
/// One executor instance lives on each worker thread; instances are built
/// by the manager's executor factory and never shared.
pub trait Executor: Send {
    /// Apply one transaction to the state.
    fn execute(
        &mut self,
        tx: &Digest,
        block_number: u64,
        slice: u64,
        lanes: &ShardMask,
    ) -> Result<(), ExecutorError>;
}

/// The stock executor: folds transactions into the storage unit's lanes.
pub struct StateExecutor {
    storage: Arc<dyn StorageUnit>,
}

impl StateExecutor {
    pub fn new(storage: Arc<dyn StorageUnit>) -> Self {
        Self { storage }
    }
}

impl Executor for StateExecutor {
    fn execute(
        &mut self,
        tx: &Digest,
        block_number: u64,
        slice: u64,
        lanes: &ShardMask,
    ) -> Result<(), ExecutorError> {
        trace!(%tx, block_number, slice, "Executing transaction");
        self.storage
            .apply_transaction(tx, lanes)
            .map_err(|error| match error {
                StorageError::TransactionUnavailable(digest) => {
                    ExecutorError::TransactionUnavailable(digest)
                }
                other => ExecutorError::Failed(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_storage::InMemoryStorageUnit;
    use meridian_types::GENESIS_MERKLE_ROOT;

    #[test]
    fn test_executes_stored_transaction() {
        let storage = Arc::new(InMemoryStorageUnit::new(4));
        let tx = Digest::hash_of(b"tx");
        storage.store_transaction(tx);

        let mut executor = StateExecutor::new(storage.clone());
        executor
            .execute(&tx, 1, 0, &ShardMask::from_lanes([0], 4))
            .unwrap();
        assert_ne!(storage.current_hash(), GENESIS_MERKLE_ROOT);
    }

    #[test]
    fn test_missing_transaction_is_reported() {
        let storage = Arc::new(InMemoryStorageUnit::new(4));
        let tx = Digest::hash_of(b"missing");

        let mut executor = StateExecutor::new(storage);
        let result = executor.execute(&tx, 1, 0, &ShardMask::from_lanes([0], 4));
        assert!(matches!(
            result,
            Err(ExecutorError::TransactionUnavailable(_))
        ));
    }
}
