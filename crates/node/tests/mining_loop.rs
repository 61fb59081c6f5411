//! Mining-path scenarios: the full pack → execute → prove → transmit loop,
//! and the seal → transmit → reload → synchronize round trip.

use meridian_chain::MainChain;
use meridian_coordinator::{
    BlockCoordinator, CoordinatorConfig, NonceSearch, State, TransactionStatusCache,
};
use meridian_execution::{
    ExecutionInterface, ExecutionManager, Executor, ExecutorFactory, StateExecutor,
};
use meridian_node::{ChannelBlockSink, QueueBlockPacker};
use meridian_storage::{InMemoryStorageUnit, StorageUnit};
use meridian_types::{
    Digest, Identity, ShardMask, TransactionLayout, TransactionStatus, GENESIS_DIGEST,
};
use std::sync::Arc;
use std::time::Duration;

const NUM_LANES: u32 = 8;
const NUM_SLICES: usize = 2;
const MAX_STEPS: usize = 20_000;

struct MiningHarness {
    chain: Arc<MainChain>,
    storage: Arc<InMemoryStorageUnit>,
    execution: Arc<ExecutionManager>,
    packer: Arc<QueueBlockPacker>,
    sink: Arc<ChannelBlockSink>,
    status_cache: Arc<TransactionStatusCache>,
    coordinator: BlockCoordinator,
}

fn mining_harness(chain: Arc<MainChain>, mining: bool) -> MiningHarness {
    let storage = Arc::new(InMemoryStorageUnit::new(NUM_LANES));

    let factory: ExecutorFactory = {
        let storage: Arc<dyn StorageUnit> = storage.clone();
        Arc::new(move || -> Box<dyn Executor> { Box::new(StateExecutor::new(storage.clone())) })
    };
    let execution = Arc::new(ExecutionManager::new(2, NUM_LANES, factory));
    execution.start();

    let packer = Arc::new(QueueBlockPacker::new());
    let sink = Arc::new(ChannelBlockSink::new(16));
    let status_cache = Arc::new(TransactionStatusCache::new());

    let config = CoordinatorConfig {
        num_lanes: NUM_LANES,
        num_slices: NUM_SLICES,
        block_difficulty: 0,
        block_period: Duration::from_secs(3600),
        mining,
    };

    let storage_dyn: Arc<dyn StorageUnit> = storage.clone();
    let execution_dyn: Arc<dyn ExecutionInterface> = execution.clone();
    let coordinator = BlockCoordinator::new(
        Arc::clone(&chain),
        storage_dyn,
        execution_dyn,
        packer.clone(),
        sink.clone(),
        Arc::clone(&status_cache),
        Arc::new(NonceSearch::new()),
        Identity::from([9u8; Identity::LENGTH]),
        config,
    );

    MiningHarness {
        chain,
        storage,
        execution,
        packer,
        sink,
        status_cache,
        coordinator,
    }
}

fn drive_to(harness: &mut MiningHarness, target: State) {
    for _ in 0..MAX_STEPS {
        if harness.coordinator.state() == target {
            return;
        }
        if harness.coordinator.step().is_some() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    panic!(
        "coordinator stuck in {} while driving to {target}",
        harness.coordinator.state()
    );
}

fn submit(harness: &MiningHarness, seed: u8, lanes: &[u32]) -> Digest {
    let digest = Digest::hash_of(&[seed]);
    harness.storage.store_transaction(digest);
    harness.packer.add(TransactionLayout::new(
        digest,
        ShardMask::from_lanes(lanes.iter().copied(), NUM_LANES),
        1,
        0,
        u64::MAX,
    ));
    digest
}

#[test]
fn test_mining_loop_trajectory() {
    let mut harness = mining_harness(Arc::new(MainChain::new()), true);
    let mut blocks = harness.sink.subscribe();

    let tx_a = submit(&harness, 1, &[0]);
    let tx_b = submit(&harness, 2, &[1, 2]);

    drive_to(&mut harness, State::Synchronized);
    assert_eq!(
        harness.coordinator.handle().last_executed_block(),
        GENESIS_DIGEST
    );

    // Expire the block interval and record the trajectory back to the
    // synchronized anchor.
    harness.coordinator.handle().trigger_block_generation();

    let mut visited = Vec::new();
    for _ in 0..MAX_STEPS {
        if harness.coordinator.step().is_some() {
            std::thread::sleep(Duration::from_millis(1));
        }
        if visited.last() != Some(&harness.coordinator.state()) {
            visited.push(harness.coordinator.state());
        }
        if harness.coordinator.state() == State::Synchronized {
            break;
        }
    }

    assert_eq!(
        visited,
        vec![
            State::PackNewBlock,
            State::ExecuteNewBlock,
            State::WaitForNewBlockExecution,
            State::ProofSearch,
            State::TransmitBlock,
            State::Reset,
            State::Synchronizing,
            State::Synchronized,
        ],
        "unexpected mining trajectory"
    );

    // Exactly one block was added to the chain and published.
    assert_eq!(harness.chain.len(), 2);
    let mined = blocks.try_recv().expect("sink received the mined block");
    assert!(blocks.try_recv().is_err());

    assert_eq!(mined.block_number, 1);
    assert_eq!(mined.previous_hash, GENESIS_DIGEST);
    assert_eq!(mined.transaction_count(), 2);
    assert!(mined.proof.is_satisfied_by(&mined.hash));

    // Publication ordering: the committed state, the execution manager's
    // record, and the published digest all agree.
    assert_eq!(harness.storage.current_hash(), mined.merkle_hash);
    assert!(harness.storage.hash_exists(&mined.merkle_hash, 1));
    assert_eq!(harness.execution.last_processed_block(), mined.hash);
    assert_eq!(
        harness.coordinator.handle().last_executed_block(),
        mined.hash
    );

    for digest in [tx_a, tx_b] {
        assert_eq!(
            harness.status_cache.status(&digest),
            TransactionStatus::Executed
        );
    }
}

#[test]
fn test_seal_transmit_reload_round_trip() {
    let chain = Arc::new(MainChain::new());

    // A mining node seals a couple of blocks.
    let mined_state = {
        let mut miner = mining_harness(Arc::clone(&chain), true);
        submit(&miner, 1, &[0]);
        submit(&miner, 2, &[3]);
        drive_to(&mut miner, State::Synchronized);

        for _ in 0..2 {
            miner.coordinator.handle().trigger_block_generation();
            let before = miner.chain.len();
            for _ in 0..MAX_STEPS {
                if miner.chain.len() > before
                    && miner.coordinator.state() == State::Synchronized
                {
                    break;
                }
                if miner.coordinator.step().is_some() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }

        assert_eq!(miner.chain.len(), 3);
        miner.storage.current_hash()
    };

    // A fresh node over the same chain: new storage, new execution
    // manager, new coordinator. Transactions are re-synchronised, state is
    // rebuilt from genesis forward.
    let mut restarted = mining_harness(chain, false);
    let tip = restarted.chain.heaviest_block();
    for digest in tip
        .tx_digests()
        .chain(
            restarted
                .chain
                .get_block(&tip.previous_hash)
                .expect("parent present")
                .tx_digests(),
        )
        .copied()
        .collect::<Vec<_>>()
    {
        restarted.storage.store_transaction(digest);
    }

    drive_to(&mut restarted, State::Synchronized);

    assert_eq!(restarted.storage.current_hash(), mined_state);
    assert_eq!(
        restarted.coordinator.handle().last_executed_block(),
        tip.hash
    );
}
