//! Execution plan construction.

use meridian_types::{Block, Digest, ShardMask};
use thiserror::Error;

/// One schedulable unit: a single transaction and the lanes it occupies.
#[derive(Clone, Debug)]
pub struct ExecutionItem {
    /// Digest of the transaction to execute.
    pub transaction_hash: Digest,
    /// Lanes the transaction touches.
    pub lanes: ShardMask,
    /// Index of the slice the transaction came from.
    pub slice: u64,
}

/// A sequence of item lists. Items within a list are mutually lane-disjoint
/// and may run in parallel; lists run strictly in order.
pub type ExecutionPlan = Vec<Vec<ExecutionItem>>;

/// Errors from planning a block.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A transaction's shard mask references a lane beyond the configured
    /// lane count.
    #[error("Shard mask for {tx} references lane {lane}, configured lanes: {num_lanes}")]
    LaneOutOfRange { tx: Digest, lane: u32, num_lanes: u32 },
}

/// Build the execution plan for a block.
///
/// Each slice is split into the minimum number of sequential item lists
/// such that every list is internally lane-disjoint. A transaction is
/// placed after the last earlier list it conflicts with, which preserves
/// intra-slice order for conflicting transactions while letting
/// independent ones share a list.
pub fn build_plan(block: &Block, num_lanes: u32) -> Result<ExecutionPlan, PlanError> {
    let mut plan: ExecutionPlan = Vec::new();

    for (slice_index, slice) in block.slices.iter().enumerate() {
        // (items, occupied lanes) lists for this slice only.
        let mut lists: Vec<(Vec<ExecutionItem>, ShardMask)> = Vec::new();

        for tx in slice {
            if let Some(lane) = tx.shard_mask.lanes().find(|lane| *lane >= num_lanes) {
                return Err(PlanError::LaneOutOfRange {
                    tx: tx.transaction_hash,
                    lane,
                    num_lanes,
                });
            }

            let item = ExecutionItem {
                transaction_hash: tx.transaction_hash,
                lanes: tx.shard_mask.clone(),
                slice: slice_index as u64,
            };

            // Earliest list the item may join without reordering a conflict.
            let barrier = lists
                .iter()
                .rposition(|(_, occupied)| occupied.overlaps(&item.lanes))
                .map(|index| index + 1)
                .unwrap_or(0);

            let slot = lists[barrier..]
                .iter()
                .position(|(_, occupied)| !occupied.overlaps(&item.lanes));
            match slot {
                Some(offset) => {
                    let (items, occupied) = &mut lists[barrier + offset];
                    occupied.union_with(&item.lanes);
                    items.push(item);
                }
                None => {
                    let occupied = item.lanes.clone();
                    lists.push((vec![item], occupied));
                }
            }
        }

        plan.extend(lists.into_iter().map(|(items, _)| items));
    }

    Ok(plan)
}
