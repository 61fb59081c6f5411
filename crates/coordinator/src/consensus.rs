//! Stock proof-of-work search.

use crate::ProofSearch;
use meridian_types::Block;
use tracing::trace;

/// Linear nonce scan over the block's candidate digest.
///
/// The scan starts from a random nonce so that competing miners do not
/// retrace each other's search space, then advances linearly. Each call
/// evaluates at most `max_iterations` candidates, leaving the nonce where
/// the search stopped so the next call resumes from there.
#[derive(Default)]
pub struct NonceSearch;

impl NonceSearch {
    pub fn new() -> Self {
        Self
    }
}

impl ProofSearch for NonceSearch {
    fn mine(&self, block: &mut Block, max_iterations: u64) -> bool {
        if block.proof.nonce() == 0 {
            block.proof.set_nonce(rand::random());
        }

        for _ in 0..max_iterations {
            let score = block.candidate_digest();
            if block.proof.is_satisfied_by(&score) {
                trace!(nonce = block.proof.nonce(), "Proof found");
                return true;
            }
            block.proof.advance();
        }

        false
    }
}
