//! Outbound block publication.

use meridian_coordinator::BlockSink;
use meridian_types::Block;
use tokio::sync::broadcast;
use tracing::info;

/// Publishes freshly mined blocks onto a broadcast channel.
///
/// Network transport is out of scope for the node core; the channel is the
/// seam where gossip (or a test) subscribes.
pub struct ChannelBlockSink {
    sender: broadcast::Sender<Block>,
}

impl ChannelBlockSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to mined blocks.
    pub fn subscribe(&self) -> broadcast::Receiver<Block> {
        self.sender.subscribe()
    }
}

impl BlockSink for ChannelBlockSink {
    fn on_block(&self, block: &Block) {
        info!(
            block = ?block.hash,
            number = block.block_number,
            txs = block.transaction_count(),
            "Publishing mined block"
        );
        // Absent subscribers are not an error.
        let _ = self.sender.send(block.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivers_to_subscriber() {
        let sink = ChannelBlockSink::new(8);
        let mut receiver = sink.subscribe();

        let block = Block::genesis();
        sink.on_block(&block);

        let received = receiver.try_recv().unwrap();
        assert_eq!(received.hash, block.hash);
    }

    #[test]
    fn test_no_subscriber_is_fine() {
        let sink = ChannelBlockSink::new(8);
        sink.on_block(&Block::genesis());
    }
}
