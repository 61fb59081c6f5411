//! Storage errors.

use meridian_types::Digest;
use thiserror::Error;

/// Errors surfaced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The transaction payload has not been synchronised locally.
    #[error("Transaction {0} is not available locally")]
    TransactionUnavailable(Digest),

    /// A shard mask referenced a lane the store was not built with.
    #[error("Lane {lane} out of range for store with {num_lanes} lanes")]
    LaneOutOfRange { lane: u32, num_lanes: u32 },
}
