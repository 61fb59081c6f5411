//! Execution manager: parallel block execution across lanes.
//!
//! The manager turns a block into an **execution plan** — a sequence of
//! independent item lists, one or more per slice. Items within a list touch
//! disjoint lane sets and are dispatched in parallel to a pool of executor
//! threads; lists are processed sequentially, so the state at the end of
//! slice `i` is the precondition for slice `i + 1`.
//!
//! A background monitor thread consumes plans, farms items to idle
//! executors, waits on an `(active, remaining)` counter pair, and moves the
//! public state from `Active` back to `Idle` when nothing remains. Failures
//! stop dispatch; aborts drain in-flight items first.

mod executor;
mod interface;
mod manager;
mod plan;

pub use executor::{Executor, ExecutorError, StateExecutor};
pub use interface::{ExecutionInterface, ExecutionState, ScheduleStatus};
pub use manager::{ExecutionManager, ExecutorFactory};
pub use plan::{build_plan, ExecutionItem, ExecutionPlan, PlanError};
