//! The block coordinator state machine.

use crate::{BlockPacker, BlockSink, Periodic, ProofSearch, TransactionStatusCache};
use meridian_chain::{BlockStatus, MainChain};
use meridian_execution::{ExecutionInterface, ExecutionState, ScheduleStatus};
use meridian_storage::StorageUnit;
use meridian_types::{
    Block, Digest, Identity, ProofOfWork, TransactionStatus, GENESIS_DIGEST, GENESIS_MERKLE_ROOT,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const TX_SYNC_NOTIFY_INTERVAL: Duration = Duration::from_secs(1);
const EXEC_NOTIFY_INTERVAL: Duration = Duration::from_millis(500);
const NOTIFY_INTERVAL: Duration = Duration::from_secs(10);

const TX_WAIT_DELAY: Duration = Duration::from_millis(200);
const EXEC_POLL_DELAY: Duration = Duration::from_millis(20);
const SYNCED_POLL_DELAY: Duration = Duration::from_millis(100);

/// Nonce candidates evaluated per proof-search handler invocation. Bounding
/// the search keeps the single-threaded machine responsive to aborts and
/// reorganisations while mining.
const PROOF_SEARCH_ITERATIONS: u64 = 100;

/// States of the block coordinator. The machine loops forever; shutdown is
/// an external stop signal that interrupts the driver.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    ReloadState,
    Synchronizing,
    Synchronized,
    PreExecBlockValidation,
    WaitForTransactions,
    ScheduleBlockExecution,
    WaitForExecution,
    PostExecBlockValidation,
    PackNewBlock,
    ExecuteNewBlock,
    WaitForNewBlockExecution,
    ProofSearch,
    TransmitBlock,
    Reset,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            State::ReloadState => "Reloading State",
            State::Synchronizing => "Synchronizing",
            State::Synchronized => "Synchronized",
            State::PreExecBlockValidation => "Pre Block Execution Validation",
            State::WaitForTransactions => "Waiting for Transactions",
            State::ScheduleBlockExecution => "Schedule Block Execution",
            State::WaitForExecution => "Waiting for Block Execution",
            State::PostExecBlockValidation => "Post Block Execution Validation",
            State::PackNewBlock => "Pack New Block",
            State::ExecuteNewBlock => "Execute New Block",
            State::WaitForNewBlockExecution => "Waiting for New Block Execution",
            State::ProofSearch => "Searching for Proof",
            State::TransmitBlock => "Transmitting Block",
            State::Reset => "Reset",
        };
        f.write_str(text)
    }
}

/// Executor status as the coordinator sees it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ExecutionStatus {
    Idle,
    Running,
    Stalled,
    Error,
}

/// Coordinator configuration.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Number of execution lanes; must be a power of two.
    pub num_lanes: u32,
    /// Number of slices every block carries.
    pub num_slices: usize,
    /// Proof-of-work target for mined blocks (leading zero bits).
    pub block_difficulty: u64,
    /// Minimum interval between mined blocks.
    pub block_period: Duration,
    /// Whether this node mines at all.
    pub mining: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            num_lanes: 8,
            num_slices: 4,
            block_difficulty: 8,
            block_period: Duration::from_secs(1),
            mining: false,
        }
    }
}

/// Control state shared between the coordinator and its handles.
struct ControlState {
    mining: bool,
    mining_enabled: AtomicBool,
    last_executed_block: Mutex<Digest>,
    next_block_time: Mutex<Instant>,
    block_period: Mutex<Duration>,
}

impl ControlState {
    fn last_executed(&self) -> Digest {
        *self.last_executed_block.lock()
    }

    fn publish_last_executed(&self, hash: Digest) {
        *self.last_executed_block.lock() = hash;
    }

    fn next_block_time(&self) -> Instant {
        *self.next_block_time.lock()
    }

    fn refresh_next_block_time(&self) {
        *self.next_block_time.lock() = Instant::now() + *self.block_period.lock();
    }
}

/// Thread-safe handle onto a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    control: Arc<ControlState>,
}

impl CoordinatorHandle {
    /// Force the block interval to expire so the machine can generate a
    /// block immediately if it is mining.
    pub fn trigger_block_generation(&self) {
        if self.control.mining {
            *self.control.next_block_time.lock() = Instant::now();
        }
    }

    /// Snapshot of the most recently executed-and-committed block.
    pub fn last_executed_block(&self) -> Digest {
        self.control.last_executed()
    }

    /// Toggle mining at runtime. Has no effect on nodes built without
    /// mining.
    pub fn enable_mining(&self, enabled: bool) {
        self.control.mining_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Replace the block period.
    pub fn set_block_period(&self, period: Duration) {
        *self.control.block_period.lock() = period;
    }
}

/// The coordinator: a single logical actor driving the block life cycle.
pub struct BlockCoordinator {
    chain: Arc<MainChain>,
    storage: Arc<dyn StorageUnit>,
    execution: Arc<dyn ExecutionInterface>,
    packer: Arc<dyn BlockPacker>,
    sink: Arc<dyn BlockSink>,
    status_cache: Arc<TransactionStatusCache>,
    identity: Identity,

    control: Arc<ControlState>,

    state: State,
    previous_state: State,
    current_block: Option<Arc<Block>>,
    next_block: Option<Block>,
    pending_txs: Option<HashSet<Digest>>,
    /// Reserved; cleared on reset, never incremented.
    #[allow(dead_code)]
    stall_count: usize,
    /// Delay requested by the handler that just ran.
    delay: Option<Duration>,

    num_lanes: u32,
    num_slices: usize,
    block_difficulty: u64,

    proof_search: Arc<dyn ProofSearch>,

    periodic_print: Periodic,
    tx_wait_periodic: Periodic,
    exec_wait_periodic: Periodic,
    syncing_periodic: Periodic,
}

impl BlockCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<MainChain>,
        storage: Arc<dyn StorageUnit>,
        execution: Arc<dyn ExecutionInterface>,
        packer: Arc<dyn BlockPacker>,
        sink: Arc<dyn BlockSink>,
        status_cache: Arc<TransactionStatusCache>,
        proof_search: Arc<dyn ProofSearch>,
        identity: Identity,
        config: CoordinatorConfig,
    ) -> Self {
        let control = Arc::new(ControlState {
            mining: config.mining,
            mining_enabled: AtomicBool::new(config.mining),
            last_executed_block: Mutex::new(GENESIS_DIGEST),
            next_block_time: Mutex::new(Instant::now() + config.block_period),
            block_period: Mutex::new(config.block_period),
        });

        Self {
            chain,
            storage,
            execution,
            packer,
            sink,
            status_cache,
            identity,
            control,
            state: State::ReloadState,
            previous_state: State::ReloadState,
            current_block: None,
            next_block: None,
            pending_txs: None,
            stall_count: 0,
            delay: None,
            num_lanes: config.num_lanes,
            num_slices: config.num_slices,
            block_difficulty: config.block_difficulty,
            proof_search,
            periodic_print: Periodic::new(NOTIFY_INTERVAL),
            tx_wait_periodic: Periodic::new(TX_SYNC_NOTIFY_INTERVAL),
            exec_wait_periodic: Periodic::new(EXEC_NOTIFY_INTERVAL),
            syncing_periodic: Periodic::new(NOTIFY_INTERVAL),
        }
    }

    /// A cloneable, thread-safe handle for the external API.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> State {
        self.state
    }

    /// Run the handler for the current state once.
    ///
    /// Returns the delay the machine asks for before the next invocation.
    /// The driver owns the parking; no handler ever blocks.
    pub fn step(&mut self) -> Option<Duration> {
        self.delay = None;

        let previous = self.state;
        let next = match self.state {
            State::ReloadState => self.on_reload_state(),
            State::Synchronizing => self.on_synchronizing(),
            State::Synchronized => self.on_synchronized(),
            State::PreExecBlockValidation => self.on_pre_exec_block_validation(),
            State::WaitForTransactions => self.on_wait_for_transactions(),
            State::ScheduleBlockExecution => self.on_schedule_block_execution(),
            State::WaitForExecution => self.on_wait_for_execution(),
            State::PostExecBlockValidation => self.on_post_exec_block_validation(),
            State::PackNewBlock => self.on_pack_new_block(),
            State::ExecuteNewBlock => self.on_execute_new_block(),
            State::WaitForNewBlockExecution => self.on_wait_for_new_block_execution(),
            State::ProofSearch => self.on_proof_search(),
            State::TransmitBlock => self.on_transmit_block(),
            State::Reset => self.on_reset(),
        };

        if next != previous {
            self.state = next;
            if self.periodic_print.poll() {
                info!(current = %self.state, previous = %previous, "Current state");
            }
        }
        self.previous_state = previous;

        self.delay.take()
    }

    /// Called once at startup: revert persisted state to the heaviest tip.
    fn on_reload_state(&mut self) -> State {
        if self.current_block.is_none() {
            self.current_block = Some(self.chain.heaviest_block());
        }

        // Reaching genesis here means there is no state to reload (fresh
        // node) or previous state is unrecoverable; either way coordination
        // restarts from scratch.
        if let Some(current) = &self.current_block {
            if current.previous_hash != GENESIS_DIGEST {
                let reverted = self
                    .storage
                    .revert_to_hash(&current.merkle_hash, current.block_number);
                if reverted {
                    info!(
                        block = ?current.hash,
                        number = current.block_number,
                        "Reloaded state from heaviest block"
                    );
                    self.execution.set_last_processed_block(current.hash);
                    self.control.publish_last_executed(current.hash);
                } else {
                    warn!(
                        block = ?current.hash,
                        "Unable to reload state for heaviest block"
                    );
                }
            }
        }

        State::Reset
    }

    /// Converge the last executed block onto the heaviest tip.
    fn on_synchronizing(&mut self) -> State {
        let current = match &self.current_block {
            Some(block) => Arc::clone(block),
            None => {
                let block = self.chain.heaviest_block();
                self.current_block = Some(Arc::clone(&block));
                block
            }
        };

        let extra_debug = self.syncing_periodic.poll();

        let current_hash = current.hash;
        let previous_hash = current.previous_hash;
        let last_processed = self.execution.last_processed_block();

        if extra_debug {
            debug!(
                heaviest = ?self.chain.heaviest_block_hash(),
                current = ?current_hash,
                previous = ?previous_hash,
                desired_state = ?current.merkle_hash,
                current_state = ?self.storage.current_hash(),
                last_commit = ?self.storage.last_commit_hash(),
                last_processed = ?last_processed,
                last_executed = ?self.control.last_executed(),
                "Sync status"
            );
        }

        if current_hash == last_processed {
            // Successfully caught up with the chain of blocks.
            return State::Synchronized;
        }

        if last_processed == GENESIS_DIGEST {
            // Start up: walk back until the genesis child, which is the
            // first block to execute.
            if previous_hash == GENESIS_DIGEST {
                return State::PreExecBlockValidation;
            }
            return match self.chain.get_block(&previous_hash) {
                Some(previous) => {
                    self.current_block = Some(previous);
                    State::Synchronizing
                }
                None => {
                    warn!(block = ?current_hash, "Unable to look up previous block");
                    State::Reset
                }
            };
        }

        // Normal case: at least one block has been processed before.
        let blocks = match self
            .chain
            .path_to_common_ancestor(&current_hash, &last_processed)
        {
            Some(blocks) if blocks.len() >= 2 => blocks,
            _ => {
                warn!(block = ?current_hash, "Unable to look up common ancestor");
                return State::Reset;
            }
        };

        let common_parent = Arc::clone(&blocks[blocks.len() - 1]);
        let next_block = Arc::clone(&blocks[blocks.len() - 2]);

        if extra_debug {
            let completion =
                (next_block.block_number as f64 * 100.0) / (current.block_number.max(1) as f64);
            info!(
                "Synchronising of chain in progress. {completion:.1}% (block {} of {})",
                next_block.block_number, current.block_number
            );
        }

        // The common parent is expected to have been processed already.
        if !self
            .storage
            .hash_exists(&common_parent.merkle_hash, common_parent.block_number)
        {
            error!(
                block = ?current_hash,
                number = common_parent.block_number,
                "Ancestor block's state hash cannot be retrieved"
            );

            // Bad situation; the simplest way out is back to genesis.
            self.execution.set_last_processed_block(GENESIS_DIGEST);
            if !self.storage.revert_to_hash(&GENESIS_MERKLE_ROOT, 0) {
                error!("Unable to revert back to genesis");
            }
            return State::Reset;
        }

        if !self
            .storage
            .revert_to_hash(&common_parent.merkle_hash, common_parent.block_number)
        {
            error!(block = ?current_hash, "Unable to restore state for block");
            return State::Reset;
        }

        self.current_block = Some(next_block);
        State::PreExecBlockValidation
    }

    /// Idle / mining anchor: watch for chain updates and block intervals.
    fn on_synchronized(&mut self) -> State {
        // The sync progress gate must not fire once caught up.
        self.syncing_periodic.reset();

        let Some(current) = self.current_block.as_ref().map(Arc::clone) else {
            return State::Reset;
        };

        if self.chain.heaviest_block_hash() != current.hash {
            // The chain has moved; re-evaluate from scratch.
            return State::Reset;
        }

        let mining_due = self.control.mining
            && self.control.mining_enabled.load(Ordering::SeqCst)
            && Instant::now() >= self.control.next_block_time();

        if mining_due {
            let mut proof = ProofOfWork::default();
            proof.set_target(self.block_difficulty);

            self.next_block = Some(Block {
                hash: Digest::ZERO,
                previous_hash: current.hash,
                block_number: current.block_number + 1,
                miner: self.identity.clone(),
                merkle_hash: Digest::ZERO,
                log2_num_lanes: self.num_lanes.trailing_zeros() as u8,
                slices: Vec::new(),
                proof,
            });

            // The current block is discarded; we are making a new one.
            self.current_block = None;
            return State::PackNewBlock;
        }

        if self.previous_state == State::Synchronizing {
            info!(
                block = ?current.hash,
                number = current.block_number,
                previous = ?current.previous_hash,
                "Chain sync complete"
            );
        }

        self.delay = Some(SYNCED_POLL_DELAY);
        State::Synchronized
    }

    /// Structural checks on the current block before execution.
    fn on_pre_exec_block_validation(&mut self) -> State {
        let Some(current) = self.current_block.as_ref().map(Arc::clone) else {
            return State::Reset;
        };

        let is_genesis = current.previous_hash == GENESIS_DIGEST;
        if !is_genesis {
            let Some(previous) = self.chain.get_block(&current.previous_hash) else {
                return self.reject_block(&current, "no previous block in chain");
            };

            if current.block_number != previous.block_number + 1 {
                return self.reject_block(&current, "block number mismatch");
            }
            if !current.miner.is_well_formed() {
                return self.reject_block(&current, "miner identity size mismatch");
            }
            if self.num_lanes != current.num_lanes() {
                return self.reject_block(&current, "lane count mismatch");
            }
            if self.num_slices != current.slices.len() {
                return self.reject_block(&current, "slice count mismatch");
            }
        }

        self.tx_wait_periodic.reset();
        State::WaitForTransactions
    }

    /// Wait until every transaction the block references is local.
    fn on_wait_for_transactions(&mut self) -> State {
        if self.pending_txs.is_none() {
            let Some(current) = &self.current_block else {
                return State::Reset;
            };
            self.pending_txs = Some(current.tx_digests().copied().collect());
        }

        let storage = Arc::clone(&self.storage);
        let Some(pending) = self.pending_txs.as_mut() else {
            return State::Reset;
        };
        pending.retain(|digest| !storage.has_transaction(digest));

        if pending.is_empty() {
            debug!("All transactions have been synchronised");
            self.pending_txs = None;
            return State::ScheduleBlockExecution;
        }

        if self.tx_wait_periodic.poll() {
            info!(outstanding = pending.len(), "Waiting for transactions to sync");
        }
        self.delay = Some(TX_WAIT_DELAY);
        State::WaitForTransactions
    }

    fn on_schedule_block_execution(&mut self) -> State {
        if self.schedule_current_block() {
            self.exec_wait_periodic.reset();
            State::WaitForExecution
        } else {
            State::Reset
        }
    }

    fn on_wait_for_execution(&mut self) -> State {
        match self.query_executor_status() {
            ExecutionStatus::Idle => State::PostExecBlockValidation,
            ExecutionStatus::Running => {
                if self.exec_wait_periodic.poll() {
                    if let Some(current) = &self.current_block {
                        info!(block = ?current.hash, "Waiting for execution to complete");
                    }
                }
                self.delay = Some(EXEC_POLL_DELAY);
                State::WaitForExecution
            }
            ExecutionStatus::Stalled | ExecutionStatus::Error => State::Reset,
        }
    }

    /// Compare the post-execution state hash to the block's merkle hash;
    /// commit on match, unwind on mismatch.
    fn on_post_exec_block_validation(&mut self) -> State {
        let Some(current) = self.current_block.as_ref().map(Arc::clone) else {
            return State::Reset;
        };

        let state_hash = self.storage.current_hash();

        // Genesis has no pre-state, so nothing to compare against.
        let mut invalid_block = false;
        if current.previous_hash != GENESIS_DIGEST {
            if state_hash != current.merkle_hash {
                warn!(
                    block = ?current.hash,
                    expected = ?current.merkle_hash,
                    actual = ?state_hash,
                    "Block validation failed: merkle hash mismatch"
                );
                invalid_block = true;
            } else {
                debug!(block = ?current.hash, state = ?state_hash, "Merkle hash verified");
            }
        }

        if invalid_block {
            let mut revert_successful = false;

            // Restore back to the previous block if at all possible.
            if let Some(previous) = self.chain.get_block(&current.previous_hash) {
                if self
                    .storage
                    .revert_to_hash(&previous.merkle_hash, previous.block_number)
                {
                    self.execution.set_last_processed_block(previous.hash);
                    revert_successful = true;
                }
            }

            // Otherwise a complete re-sync from genesis is needed.
            if !revert_successful {
                if !self.storage.revert_to_hash(&GENESIS_MERKLE_ROOT, 0) {
                    error!("Unable to revert back to genesis");
                }
                self.execution.set_last_processed_block(GENESIS_DIGEST);
            }

            self.chain.remove_block(&current.hash);
        } else {
            self.update_tx_status(&current);
            self.storage.commit(current.block_number);
            self.control.publish_last_executed(current.hash);
        }

        State::Reset
    }

    /// Ask the packer to fill the new block with transactions.
    fn on_pack_new_block(&mut self) -> State {
        let Some(block) = self.next_block.as_mut() else {
            error!("Unable to pack an empty next block");
            return State::Reset;
        };

        match self
            .packer
            .generate_block(block, self.num_lanes, self.num_slices, &self.chain)
        {
            Ok(()) => {
                self.control.refresh_next_block_time();
                State::ExecuteNewBlock
            }
            Err(err) => {
                error!(%err, "Error generated performing block packing");
                State::Reset
            }
        }
    }

    fn on_execute_new_block(&mut self) -> State {
        if self.schedule_next_block() {
            self.exec_wait_periodic.reset();
            State::WaitForNewBlockExecution
        } else {
            State::Reset
        }
    }

    fn on_wait_for_new_block_execution(&mut self) -> State {
        match self.query_executor_status() {
            ExecutionStatus::Idle => {
                let state_hash = self.storage.current_hash();
                let Some(block) = self.next_block.as_mut() else {
                    return State::Reset;
                };

                // The new block's merkle hash is whatever execution left
                // behind; commit that state for the block's number.
                block.merkle_hash = state_hash;
                debug!(merkle = ?state_hash, "New block merkle hash");
                let block_number = block.block_number;
                self.storage.commit(block_number);

                State::ProofSearch
            }
            ExecutionStatus::Running => {
                if self.exec_wait_periodic.poll() {
                    if let Some(block) = &self.next_block {
                        warn!(
                            following = ?block.previous_hash,
                            "Waiting for new block execution"
                        );
                    }
                }
                self.delay = Some(EXEC_POLL_DELAY);
                State::WaitForNewBlockExecution
            }
            ExecutionStatus::Stalled | ExecutionStatus::Error => State::Reset,
        }
    }

    /// Bounded proof-of-work search over the new block.
    fn on_proof_search(&mut self) -> State {
        let Some(block) = self.next_block.as_mut() else {
            return State::Reset;
        };

        if self.proof_search.mine(block, PROOF_SEARCH_ITERATIONS) {
            block.update_digest();
            debug!(block = ?block.hash, "New block sealed");
            let sealed_hash = block.hash;

            // The execution manager recorded the pre-seal hash when the
            // block was scheduled; only now is the final digest known.
            self.execution.set_last_processed_block(sealed_hash);
            return State::TransmitBlock;
        }

        State::ProofSearch
    }

    /// Hand the sealed block to the chain and the outbound sink.
    fn on_transmit_block(&mut self) -> State {
        let Some(block) = self.next_block.take() else {
            return State::Reset;
        };

        match self.chain.add_block(block.clone()) {
            BlockStatus::Added => {
                info!(
                    block = ?block.hash,
                    number = block.block_number,
                    txs = block.transaction_count(),
                    "Generated new block"
                );

                self.update_tx_status(&block);
                self.control.publish_last_executed(block.hash);
                self.sink.on_block(&block);
            }
            status => {
                warn!(block = ?block.hash, ?status, "Error transmitting verified block");
            }
        }

        State::Reset
    }

    /// The single recovery point: drop all working state and re-synchronise.
    fn on_reset(&mut self) -> State {
        self.current_block = None;
        self.next_block = None;
        self.pending_txs = None;
        self.stall_count = 0;

        self.control.refresh_next_block_time();

        State::Synchronizing
    }

    fn schedule_current_block(&mut self) -> bool {
        match self.current_block.as_ref().map(Arc::clone) {
            Some(block) => self.schedule_block(&block),
            None => {
                error!("Unable to execute empty current block");
                false
            }
        }
    }

    fn schedule_next_block(&mut self) -> bool {
        match self.next_block.take() {
            Some(block) => {
                let scheduled = self.schedule_block(&block);
                self.next_block = Some(block);
                scheduled
            }
            None => {
                error!("Unable to execute empty next block");
                false
            }
        }
    }

    fn schedule_block(&mut self, block: &Block) -> bool {
        debug!(block = ?block.hash, "Attempting exec on block");

        let status = self.execution.execute(block);
        if status == ScheduleStatus::Scheduled {
            true
        } else {
            error!(?status, "Execution engine stalled");
            false
        }
    }

    /// Map the raw executor state onto the coordinator's simplified view.
    fn query_executor_status(&mut self) -> ExecutionStatus {
        let execution_state = self.execution.state();

        let status = match execution_state {
            ExecutionState::Idle => ExecutionStatus::Idle,
            ExecutionState::Active => ExecutionStatus::Running,
            ExecutionState::TransactionsUnavailable => ExecutionStatus::Stalled,
            ExecutionState::ExecutionAborted | ExecutionState::ExecutionFailed => {
                ExecutionStatus::Error
            }
        };

        if status == ExecutionStatus::Error {
            warn!(state = %execution_state, "Execution in error state");
        }

        status
    }

    fn update_tx_status(&self, block: &Block) {
        for digest in block.tx_digests() {
            self.status_cache
                .update(*digest, TransactionStatus::Executed);
        }
    }

    fn reject_block(&mut self, block: &Block, reason: &str) -> State {
        warn!(block = ?block.hash, reason, "Block validation failed");
        self.chain.remove_block(&block.hash);
        State::Reset
    }
}
