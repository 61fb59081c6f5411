//! Capabilities the coordinator borrows from the rest of the node.
//!
//! The coordinator owns its own state and holds collaborators as interface
//! references for the lifetime of the node; it never owns them.

use meridian_chain::MainChain;
use meridian_types::Block;
use thiserror::Error;

/// Errors from packing a new block.
#[derive(Debug, Error)]
pub enum PackError {
    /// The packer could not assemble a block body.
    #[error("Packing failed: {0}")]
    Failed(String),
}

/// Selects transactions to include in a freshly minted block.
pub trait BlockPacker: Send + Sync {
    /// Fill `block.slices` for the given lane and slice geometry.
    ///
    /// The block arrives with its header fields (parent, number, miner,
    /// proof target) already populated.
    fn generate_block(
        &self,
        block: &mut Block,
        num_lanes: u32,
        num_slices: usize,
        chain: &MainChain,
    ) -> Result<(), PackError>;
}

/// Outbound publication of newly mined blocks.
pub trait BlockSink: Send + Sync {
    fn on_block(&self, block: &Block);
}

/// Iterative proof-of-work search.
pub trait ProofSearch: Send + Sync {
    /// Advance the block's nonce for at most `max_iterations` candidates.
    ///
    /// Returns `true` once the block's digest satisfies the proof target;
    /// the nonce is left at the satisfying value.
    fn mine(&self, block: &mut Block, max_iterations: u64) -> bool;
}
