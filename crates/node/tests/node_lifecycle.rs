//! Runner lifecycle: start, mine, stop, restart.

use meridian_node::{Node, NodeConfig, NodeError};
use meridian_types::{Digest, ShardMask, TransactionLayout, TransactionStatus};
use std::time::Duration;

fn mining_config() -> NodeConfig {
    NodeConfig {
        log2_num_lanes: 3,
        num_slices: 2,
        num_executors: 2,
        block_difficulty: 0,
        block_period_ms: 10,
        mining: true,
    }
}

fn layout(seed: u8, lanes: &[u32]) -> TransactionLayout {
    TransactionLayout::new(
        Digest::hash_of(&[seed]),
        ShardMask::from_lanes(lanes.iter().copied(), 8),
        1,
        0,
        u64::MAX,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_node_mines_submitted_transactions() {
    let mut node = Node::build(mining_config()).unwrap();
    let mut blocks = node.subscribe_blocks();

    let tx = layout(1, &[0]);
    let digest = *tx.digest();
    node.submit_transaction(tx);
    assert_eq!(node.status_cache().status(&digest), TransactionStatus::Pending);

    node.start().unwrap();

    let mined = tokio::time::timeout(Duration::from_secs(10), blocks.recv())
        .await
        .expect("node mined no block in time")
        .expect("sink channel closed");

    assert_eq!(mined.block_number, 1);
    assert_eq!(mined.transaction_count(), 1);
    assert!(node.chain().get_block(&mined.hash).is_some());

    node.stop().await.unwrap();

    assert_eq!(node.status_cache().status(&digest), TransactionStatus::Executed);

    // The node may have mined further (empty) blocks before stopping, but
    // the published digest always names a block the chain still holds.
    let last_executed = node.handle().last_executed_block();
    assert!(node.chain().get_block(&last_executed).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_without_start_fails() {
    let mut node = Node::build(NodeConfig::default()).unwrap();
    assert!(matches!(node.stop().await, Err(NodeError::NotRunning)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_after_stop() {
    let mut node = Node::build(mining_config()).unwrap();

    node.start().unwrap();
    assert!(matches!(node.start(), Err(NodeError::AlreadyStarted)));

    node.stop().await.unwrap();

    // The coordinator survives a stop and can be driven again.
    node.start().unwrap();
    node.stop().await.unwrap();
}
