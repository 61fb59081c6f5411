//! Observational transaction status cache.

use meridian_types::{Digest, TransactionStatus};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Tracks the observed life-cycle status of transactions.
///
/// The cache is advisory metadata for operators and RPC surfaces; it is
/// never consulted for consensus decisions.
#[derive(Default)]
pub struct TransactionStatusCache {
    inner: RwLock<HashMap<Digest, TransactionStatus>>,
}

impl TransactionStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status for a transaction.
    pub fn update(&self, digest: Digest, status: TransactionStatus) {
        self.inner.write().insert(digest, status);
    }

    /// The recorded status, `Unknown` when nothing was recorded.
    pub fn status(&self, digest: &Digest) -> TransactionStatus {
        self.inner
            .read()
            .get(digest)
            .copied()
            .unwrap_or_default()
    }

    /// Number of tracked transactions.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
