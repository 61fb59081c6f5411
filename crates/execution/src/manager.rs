//! The execution manager: monitor thread plus executor worker pool.

use crate::{
    build_plan, ExecutionInterface, ExecutionItem, ExecutionPlan, ExecutionState, Executor,
    ExecutorError, ScheduleStatus,
};
use meridian_types::{Block, Digest, GENESIS_DIGEST};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds the executor owned by each worker thread.
pub type ExecutorFactory = Arc<dyn Fn() -> Box<dyn Executor> + Send + Sync>;

/// Progress of the item list currently being dispatched.
#[derive(Default)]
struct Counters {
    /// Items handed to an executor and not yet returned.
    active: usize,
    /// Items of the current list not yet completed (queued or active).
    remaining: usize,
}

struct Pending {
    /// The next plan to process, with the block number it executes.
    plan: Option<(ExecutionPlan, u64)>,
}

struct WorkQueue {
    items: VecDeque<ExecutionItem>,
    block_number: u64,
    /// First failure observed in the current list; later items drain
    /// without executing.
    failure: Option<ExecutionState>,
}

struct Shared {
    running: AtomicBool,
    state: AtomicU8,
    abort_requested: AtomicBool,
    completed_executions: AtomicUsize,
    last_processed: Mutex<Digest>,

    /// Guards the pending plan. The monitor sleeps on `monitor_wake`.
    pending: Mutex<Pending>,
    monitor_wake: Condvar,

    /// Guards the dispatch queue. Workers sleep on `worker_wake`.
    work: Mutex<WorkQueue>,
    worker_wake: Condvar,

    /// Guards the counter pair. The monitor sleeps on `notify` until the
    /// current list drains.
    counters: Mutex<Counters>,
    notify: Condvar,
}

impl Shared {
    fn set_state(&self, state: ExecutionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn get_state(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Orchestrates the execution of a block across a pool of executors.
///
/// The worker pool's lifetime is strictly contained within the manager's:
/// items dispatched to workers only reference plan data owned by the
/// manager's shared core, and [`ExecutionManager::stop`] joins every thread.
pub struct ExecutionManager {
    shared: Arc<Shared>,
    num_executors: usize,
    num_lanes: u32,
    factory: ExecutorFactory,
    monitor: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionManager {
    /// Create a stopped manager. Call [`ExecutionManager::start`] before
    /// offering blocks.
    pub fn new(num_executors: usize, num_lanes: u32, factory: ExecutorFactory) -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                state: AtomicU8::new(ExecutionState::Idle as u8),
                abort_requested: AtomicBool::new(false),
                completed_executions: AtomicUsize::new(0),
                last_processed: Mutex::new(GENESIS_DIGEST),
                pending: Mutex::new(Pending { plan: None }),
                monitor_wake: Condvar::new(),
                work: Mutex::new(WorkQueue {
                    items: VecDeque::new(),
                    block_number: 0,
                    failure: None,
                }),
                worker_wake: Condvar::new(),
                counters: Mutex::new(Counters::default()),
                notify: Condvar::new(),
            }),
            num_executors: num_executors.max(1),
            num_lanes,
            factory,
            monitor: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the monitor and the executor pool.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let monitor = std::thread::Builder::new()
            .name("exec-monitor".into())
            .spawn(move || monitor_entrypoint(shared))
            .expect("spawning the execution monitor thread");
        *self.monitor.lock() = Some(monitor);

        let mut workers = self.workers.lock();
        for index in 0..self.num_executors {
            let shared = Arc::clone(&self.shared);
            let executor = (self.factory)();
            let worker = std::thread::Builder::new()
                .name(format!("exec-{index}"))
                .spawn(move || worker_entrypoint(shared, executor))
                .expect("spawning an executor thread");
            workers.push(worker);
        }

        info!(num_executors = self.num_executors, "Execution manager started");
    }

    /// Stop dispatch and join every thread. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Wake everything so blocked threads observe the stop.
        {
            let _pending = self.shared.pending.lock();
            self.shared.monitor_wake.notify_all();
        }
        {
            let _work = self.shared.work.lock();
            self.shared.worker_wake.notify_all();
        }
        {
            let _counters = self.shared.counters.lock();
            self.shared.notify.notify_all();
        }

        if let Some(monitor) = self.monitor.lock().take() {
            let _ = monitor.join();
        }
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }

        info!("Execution manager stopped");
    }

    /// Number of transactions executed since start.
    pub fn completed_executions(&self) -> usize {
        self.shared.completed_executions.load(Ordering::Relaxed)
    }
}

impl ExecutionInterface for ExecutionManager {
    fn execute(&self, block: &Block) -> ScheduleStatus {
        if !self.shared.is_running() {
            return ScheduleStatus::NotStarted;
        }
        if self.shared.get_state() == ExecutionState::Active {
            return ScheduleStatus::AlreadyRunning;
        }

        let plan = match build_plan(block, self.num_lanes) {
            Ok(plan) => plan,
            Err(err) => {
                error!(block = ?block.hash, %err, "Unable to plan block execution");
                return ScheduleStatus::UnableToPlan;
            }
        };

        debug!(
            block = ?block.hash,
            lists = plan.len(),
            transactions = block.transaction_count(),
            "Scheduling block execution"
        );

        // The scheduled block becomes the last processed one; for mined
        // blocks the coordinator overwrites this once the final digest is
        // known.
        *self.shared.last_processed.lock() = block.hash;
        self.shared.abort_requested.store(false, Ordering::SeqCst);
        self.shared.set_state(ExecutionState::Active);

        self.shared.pending.lock().plan = Some((plan, block.block_number));
        self.shared.monitor_wake.notify_one();

        ScheduleStatus::Scheduled
    }

    fn set_last_processed_block(&self, hash: Digest) {
        *self.shared.last_processed.lock() = hash;
    }

    fn last_processed_block(&self) -> Digest {
        *self.shared.last_processed.lock()
    }

    fn state(&self) -> ExecutionState {
        self.shared.get_state()
    }

    fn abort(&self) -> bool {
        if self.shared.get_state() != ExecutionState::Active {
            return false;
        }
        self.shared.abort_requested.store(true, Ordering::SeqCst);
        true
    }
}

impl Drop for ExecutionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn monitor_entrypoint(shared: Arc<Shared>) {
    while shared.is_running() {
        // Sleep until a plan arrives or the manager stops.
        let (plan, block_number) = {
            let mut pending = shared.pending.lock();
            loop {
                if !shared.is_running() {
                    return;
                }
                if let Some(next) = pending.plan.take() {
                    break next;
                }
                shared.monitor_wake.wait(&mut pending);
            }
        };

        let total: usize = plan.iter().map(Vec::len).sum();
        debug!(lists = plan.len(), items = total, block_number, "Consuming execution plan");

        let mut outcome = ExecutionState::Idle;
        for list in plan {
            if shared.abort_requested.load(Ordering::SeqCst) {
                outcome = ExecutionState::ExecutionAborted;
                break;
            }

            // Arm the counters, then farm the whole list out at once; the
            // items are mutually lane-disjoint.
            {
                let mut counters = shared.counters.lock();
                counters.active = 0;
                counters.remaining = list.len();
            }
            {
                let mut work = shared.work.lock();
                work.block_number = block_number;
                work.items.extend(list);
                shared.worker_wake.notify_all();
            }

            // Wait until every item of the list has drained.
            {
                let mut counters = shared.counters.lock();
                while counters.remaining > 0 && shared.is_running() {
                    shared.notify.wait(&mut counters);
                }
                if counters.remaining > 0 {
                    return;
                }
            }

            if let Some(failed) = shared.work.lock().failure.take() {
                outcome = failed;
                break;
            }
            if shared.abort_requested.load(Ordering::SeqCst) {
                outcome = ExecutionState::ExecutionAborted;
                break;
            }
        }

        shared.abort_requested.store(false, Ordering::SeqCst);
        shared.set_state(outcome);
        match outcome {
            ExecutionState::Idle => debug!(block_number, "Block execution complete"),
            other => warn!(block_number, state = %other, "Block execution did not complete"),
        }
    }
}

fn worker_entrypoint(shared: Arc<Shared>, mut executor: Box<dyn Executor>) {
    loop {
        let (item, block_number, skip) = {
            let mut work = shared.work.lock();
            loop {
                if !shared.is_running() {
                    return;
                }
                if let Some(item) = work.items.pop_front() {
                    let skip =
                        work.failure.is_some() || shared.abort_requested.load(Ordering::SeqCst);
                    break (item, work.block_number, skip);
                }
                shared.worker_wake.wait(&mut work);
            }
        };

        shared.counters.lock().active += 1;

        let result = if skip {
            Ok(())
        } else {
            executor.execute(
                &item.transaction_hash,
                block_number,
                item.slice,
                &item.lanes,
            )
        };

        match result {
            Ok(()) => {
                if !skip {
                    shared
                        .completed_executions
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                warn!(tx = ?item.transaction_hash, %err, "Executor reported failure");
                let failed = match err {
                    ExecutorError::TransactionUnavailable(_) => {
                        ExecutionState::TransactionsUnavailable
                    }
                    ExecutorError::Failed(_) => ExecutionState::ExecutionFailed,
                };
                let mut work = shared.work.lock();
                if work.failure.is_none() {
                    work.failure = Some(failed);
                }
            }
        }

        let mut counters = shared.counters.lock();
        counters.active -= 1;
        counters.remaining -= 1;
        if counters.remaining == 0 {
            shared.notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateExecutor;
    use meridian_storage::{InMemoryStorageUnit, StorageUnit};
    use meridian_types::{
        Identity, ProofOfWork, ShardMask, TransactionSummary, GENESIS_MERKLE_ROOT,
    };
    use std::time::{Duration, Instant};

    const NUM_LANES: u32 = 8;

    fn manager_over(storage: Arc<InMemoryStorageUnit>, executors: usize) -> ExecutionManager {
        let factory: ExecutorFactory = {
            let storage: Arc<dyn StorageUnit> = storage.clone();
            Arc::new(move || -> Box<dyn Executor> {
                Box::new(StateExecutor::new(storage.clone()))
            })
        };
        ExecutionManager::new(executors, NUM_LANES, factory)
    }

    fn block_with(storage: &InMemoryStorageUnit, seeds: &[(u8, &[u32])]) -> Block {
        let slice: Vec<TransactionSummary> = seeds
            .iter()
            .map(|(seed, lanes)| {
                let digest = Digest::hash_of(&[*seed]);
                storage.store_transaction(digest);
                TransactionSummary {
                    transaction_hash: digest,
                    shard_mask: ShardMask::from_lanes(lanes.iter().copied(), NUM_LANES),
                }
            })
            .collect();
        let mut block = Block {
            hash: Digest::ZERO,
            previous_hash: Digest::hash_of(b"parent"),
            block_number: 1,
            miner: Identity::from([1u8; Identity::LENGTH]),
            merkle_hash: Digest::ZERO,
            log2_num_lanes: 3,
            slices: vec![slice],
            proof: ProofOfWork::default(),
        };
        block.update_digest();
        block
    }

    fn wait_until_settled(manager: &ExecutionManager) -> ExecutionState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = manager.state();
            if state != ExecutionState::Active {
                return state;
            }
            assert!(Instant::now() < deadline, "execution did not settle");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_not_started_until_start() {
        let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));
        let manager = manager_over(storage.clone(), 2);
        let block = block_with(&storage, &[(1, &[0])]);
        assert_eq!(manager.execute(&block), ScheduleStatus::NotStarted);
    }

    #[test]
    fn test_executes_block_to_idle() {
        let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));
        let manager = manager_over(storage.clone(), 4);
        manager.start();

        let block = block_with(&storage, &[(1, &[0]), (2, &[1]), (3, &[2, 3])]);
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert_eq!(manager.last_processed_block(), block.hash);

        assert_eq!(wait_until_settled(&manager), ExecutionState::Idle);
        assert_eq!(manager.completed_executions(), 3);
        assert_ne!(storage.current_hash(), GENESIS_MERKLE_ROOT);

        manager.stop();
    }

    #[test]
    fn test_missing_transaction_reports_unavailable() {
        let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));
        let manager = manager_over(storage.clone(), 2);
        manager.start();

        let mut block = block_with(&storage, &[(1, &[0])]);
        // A transaction the storage never saw.
        block.slices[0].push(TransactionSummary {
            transaction_hash: Digest::hash_of(b"never synced"),
            shard_mask: ShardMask::from_lanes([5], NUM_LANES),
        });
        block.update_digest();

        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert_eq!(
            wait_until_settled(&manager),
            ExecutionState::TransactionsUnavailable
        );

        manager.stop();
    }

    #[test]
    fn test_reschedule_after_failure() {
        let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));
        let manager = manager_over(storage.clone(), 2);
        manager.start();

        let mut bad = block_with(&storage, &[]);
        bad.slices[0].push(TransactionSummary {
            transaction_hash: Digest::hash_of(b"missing"),
            shard_mask: ShardMask::from_lanes([0], NUM_LANES),
        });
        bad.update_digest();
        manager.execute(&bad);
        assert_eq!(
            wait_until_settled(&manager),
            ExecutionState::TransactionsUnavailable
        );

        let good = block_with(&storage, &[(9, &[1])]);
        assert_eq!(manager.execute(&good), ScheduleStatus::Scheduled);
        assert_eq!(wait_until_settled(&manager), ExecutionState::Idle);

        manager.stop();
    }

    #[test]
    fn test_deterministic_state_across_executor_counts() {
        let run = |executors: usize| {
            let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));
            let manager = manager_over(storage.clone(), executors);
            manager.start();
            let block = block_with(
                &storage,
                &[(1, &[0]), (2, &[1]), (3, &[2]), (4, &[0, 1]), (5, &[3])],
            );
            manager.execute(&block);
            assert_eq!(wait_until_settled(&manager), ExecutionState::Idle);
            manager.stop();
            storage.current_hash()
        };

        assert_eq!(run(1), run(4));
    }

    #[test]
    fn test_empty_block_settles_idle() {
        let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));
        let manager = manager_over(storage.clone(), 2);
        manager.start();

        let block = block_with(&storage, &[]);
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert_eq!(wait_until_settled(&manager), ExecutionState::Idle);
        assert_eq!(storage.current_hash(), GENESIS_MERKLE_ROOT);

        manager.stop();
    }

    #[test]
    fn test_set_last_processed_overrides_schedule_record() {
        let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));
        let manager = manager_over(storage.clone(), 1);
        manager.start();

        let block = block_with(&storage, &[(1, &[0])]);
        manager.execute(&block);
        wait_until_settled(&manager);

        let rehashed = Digest::hash_of(b"sealed with proof");
        manager.set_last_processed_block(rehashed);
        assert_eq!(manager.last_processed_block(), rehashed);

        manager.stop();
    }
}
