//! The contract the block coordinator holds onto the execution engine.

use meridian_types::{Block, Digest};
use std::fmt;

/// Outcome of offering a block for execution.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScheduleStatus {
    /// The block was planned and dispatch has begun.
    Scheduled,
    /// A block is already being executed.
    AlreadyRunning,
    /// The manager has not been started (or has been stopped).
    NotStarted,
    /// No execution plan could be built for the block.
    UnableToPlan,
}

/// Public state of the execution engine.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ExecutionState {
    /// No block in flight.
    Idle = 0,
    /// A block is being executed.
    Active = 1,
    /// Execution stopped because a transaction payload was missing.
    TransactionsUnavailable = 2,
    /// Execution was aborted on request.
    ExecutionAborted = 3,
    /// An executor reported a failure.
    ExecutionFailed = 4,
}

impl ExecutionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Active,
            2 => Self::TransactionsUnavailable,
            3 => Self::ExecutionAborted,
            _ => Self::ExecutionFailed,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "Idle",
            Self::Active => "Active",
            Self::TransactionsUnavailable => "Transactions Unavailable",
            Self::ExecutionAborted => "Execution Aborted",
            Self::ExecutionFailed => "Execution Failed",
        };
        f.write_str(text)
    }
}

/// Interface consumed by the block coordinator.
///
/// Thread-safe: the coordinator polls state from its own driver thread while
/// the manager's monitor and workers make progress.
pub trait ExecutionInterface: Send + Sync {
    /// Offer a block's body for execution.
    fn execute(&self, block: &Block) -> ScheduleStatus;

    /// Overwrite the record of the most recently processed block.
    fn set_last_processed_block(&self, hash: Digest);

    /// The most recently processed (or scheduled) block.
    fn last_processed_block(&self) -> Digest;

    /// Current public state.
    fn state(&self) -> ExecutionState;

    /// Abort the block currently in flight, draining active items.
    ///
    /// Returns `true` when there was an execution to abort.
    fn abort(&self) -> bool;
}
