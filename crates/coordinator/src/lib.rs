//! Block coordinator: the control-plane state machine of a Meridian node.
//!
//! The coordinator decides which block is current, synchronises persisted
//! state to it, validates blocks before and after execution, schedules
//! slices on the execution manager, and — when the node mines — packs,
//! executes, proves and transmits new blocks.
//!
//! The state machine is **single-threaded cooperative**: a driver repeatedly
//! invokes [`BlockCoordinator::step`], which runs exactly one handler and
//! reports the delay to park for before the next invocation. Handlers never
//! block on external I/O; waiting is expressed by staying in the same state
//! with a delay. Every recoverable error funnels through the `Reset` state,
//! which re-selects the heaviest tip and forces re-synchronisation.

mod consensus;
mod coordinator;
mod periodic;
mod status_cache;
mod traits;

pub use consensus::NonceSearch;
pub use coordinator::{BlockCoordinator, CoordinatorConfig, CoordinatorHandle, State};
pub use periodic::Periodic;
pub use status_cache::TransactionStatusCache;
pub use traits::{BlockPacker, BlockSink, PackError, ProofSearch};
