//! Node assembly and the coordinator driver.

use crate::{ChannelBlockSink, NodeConfig, NodeError, QueueBlockPacker};
use meridian_chain::MainChain;
use meridian_coordinator::{
    BlockCoordinator, CoordinatorConfig, CoordinatorHandle, NonceSearch, TransactionStatusCache,
};
use meridian_execution::{
    ExecutionInterface, ExecutionManager, Executor, ExecutorFactory, StateExecutor,
};
use meridian_storage::{InMemoryStorageUnit, StorageUnit};
use meridian_types::{Block, Identity, TransactionLayout, TransactionStatus};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// A fully wired Meridian node.
///
/// Owns every long-lived subsystem; the coordinator borrows them as
/// capabilities and runs on a dedicated driver task between
/// [`Node::start`] and [`Node::stop`].
pub struct Node {
    chain: Arc<MainChain>,
    storage: Arc<InMemoryStorageUnit>,
    execution: Arc<ExecutionManager>,
    packer: Arc<QueueBlockPacker>,
    sink: Arc<ChannelBlockSink>,
    status_cache: Arc<TransactionStatusCache>,
    handle: CoordinatorHandle,
    coordinator: Option<BlockCoordinator>,
    stop: watch::Sender<bool>,
    driver: Option<JoinHandle<BlockCoordinator>>,
}

impl Node {
    /// Wire up a node from configuration.
    pub fn build(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;

        let num_lanes = config.num_lanes();
        let chain = Arc::new(MainChain::new());
        let storage = Arc::new(InMemoryStorageUnit::new(num_lanes));

        let factory: ExecutorFactory = {
            let storage: Arc<dyn StorageUnit> = storage.clone();
            Arc::new(move || -> Box<dyn Executor> {
                Box::new(StateExecutor::new(storage.clone()))
            })
        };
        let execution = Arc::new(ExecutionManager::new(
            config.num_executors,
            num_lanes,
            factory,
        ));

        let packer = Arc::new(QueueBlockPacker::new());
        let sink = Arc::new(ChannelBlockSink::new(64));
        let status_cache = Arc::new(TransactionStatusCache::new());

        let identity = {
            use rand::Rng;
            let mut bytes = [0u8; Identity::LENGTH];
            rand::thread_rng().fill(&mut bytes);
            Identity::from(bytes)
        };

        let coordinator_config = CoordinatorConfig {
            num_lanes,
            num_slices: config.num_slices,
            block_difficulty: config.block_difficulty,
            block_period: config.block_period(),
            mining: config.mining,
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
            identity,
            coordinator_config,
        );
        let handle = coordinator.handle();

        let (stop, _) = watch::channel(false);

        Ok(Self {
            chain,
            storage,
            execution,
            packer,
            sink,
            status_cache,
            handle,
            coordinator: Some(coordinator),
            stop,
            driver: None,
        })
    }

    /// Start the execution manager and the coordinator driver task.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.driver.is_some() {
            return Err(NodeError::AlreadyStarted);
        }
        let coordinator = self.coordinator.take().ok_or(NodeError::AlreadyStarted)?;

        self.execution.start();
        self.stop.send_replace(false);

        let stop_rx = self.stop.subscribe();
        self.driver = Some(tokio::spawn(drive(coordinator, stop_rx)));

        info!("Node started");
        Ok(())
    }

    /// Signal the driver to stop, wait for it, and join the execution
    /// manager's threads.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        let driver = self.driver.take().ok_or(NodeError::NotRunning)?;
        self.stop.send_replace(true);

        if let Ok(coordinator) = driver.await {
            // Keep the machine around so the node could be restarted.
            self.coordinator = Some(coordinator);
        }
        self.execution.stop();

        info!("Node stopped");
        Ok(())
    }

    /// Ingest a transaction: record its payload, track its status, and
    /// queue it for packing.
    pub fn submit_transaction(&self, layout: TransactionLayout) {
        let digest = *layout.digest();
        self.storage.store_transaction(digest);
        self.status_cache.update(digest, TransactionStatus::Pending);
        self.packer.add(layout);
    }

    /// Thread-safe coordinator handle.
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Subscribe to blocks this node mines.
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Block> {
        self.sink.subscribe()
    }

    pub fn chain(&self) -> &Arc<MainChain> {
        &self.chain
    }

    pub fn storage(&self) -> &Arc<InMemoryStorageUnit> {
        &self.storage
    }

    pub fn status_cache(&self) -> &Arc<TransactionStatusCache> {
        &self.status_cache
    }

    pub fn execution(&self) -> &Arc<ExecutionManager> {
        &self.execution
    }
}

/// Drive the state machine until the stop signal flips.
///
/// One handler runs per iteration; requested delays park the task without
/// blocking the runtime, and the stop signal cuts parked delays short.
async fn drive(
    mut coordinator: BlockCoordinator,
    mut stop: watch::Receiver<bool>,
) -> BlockCoordinator {
    info!("Block coordinator driver started");
    loop {
        if *stop.borrow() {
            break;
        }
        match coordinator.step() {
            Some(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => {}
                }
            }
            None => tokio::task::yield_now().await,
        }
    }
    info!("Block coordinator driver stopped");
    coordinator
}
