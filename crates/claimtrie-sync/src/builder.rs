//! Fluent builder API for sync loops.
//!
//! # Example
//!
//! ```rust,no_run
//! use claimtrie_sync::{MemoryBlockSource, SyncBuilder};
//! use claimtrie_core::{BlockProcessor, ExpirationParams, NetworkParams};
//!
//! # async fn example() -> Result<(), claimtrie_core::ClaimTrieError> {
//! let params = NetworkParams::new(
//!     4032,
//!     32,
//!     ExpirationParams { original_window: 262_974, extended_window: 2_102_400, extended_fork_height: 400_155 },
//! );
//! let mut sync = SyncBuilder::new()
//!     .network("regtest")
//!     .start_height(1)
//!     .stop_height(500)
//!     .checkpoint_interval(50)
//!     .build(MemoryBlockSource::default(), BlockProcessor::in_memory(params)?);
//! sync.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use claimtrie_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use claimtrie_core::config::SyncConfig;
use claimtrie_core::handler::{ChangeSetHandler, HandlerRegistry, ReorgHandler};
use claimtrie_core::processor::BlockProcessor;
use claimtrie_core::store::ClaimTrieStore;

use crate::source::BlockSource;
use crate::sync_loop::SyncLoop;

/// Fluent builder for [`SyncConfig`] and [`SyncLoop`].
#[derive(Default)]
pub struct SyncBuilder {
    config: SyncConfig,
    handlers: HandlerRegistry,
    checkpoints: Option<Box<dyn CheckpointStore>>,
}

impl SyncBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sync loop ID (used for checkpoint keys).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.config.network = network.into();
        self
    }

    /// First height to process when the trie is empty.
    pub fn start_height(mut self, height: u32) -> Self {
        self.config.start_height = height;
        self
    }

    /// Stop after this height instead of following the tip.
    pub fn stop_height(mut self, height: u32) -> Self {
        self.config.stop_height = Some(height);
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set checkpoint save interval (every N blocks).
    pub fn checkpoint_interval(mut self, n: u32) -> Self {
        self.config.checkpoint_interval = n;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn reorg_window(mut self, blocks: usize) -> Self {
        self.config.reorg_window = blocks;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_change_set(mut self, handler: Arc<dyn ChangeSetHandler>) -> Self {
        self.handlers.on_change_set(handler);
        self
    }

    pub fn on_reorg(mut self, handler: Arc<dyn ReorgHandler>) -> Self {
        self.handlers.on_reorg(handler);
        self
    }

    /// Where checkpoints go. Defaults to an in-memory store.
    pub fn checkpoint_store(mut self, store: Box<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Build the `SyncConfig` only.
    pub fn build_config(self) -> SyncConfig {
        self.config
    }

    pub fn build<S: BlockSource, T: ClaimTrieStore>(self, source: S, processor: BlockProcessor<T>) -> SyncLoop<S, T> {
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Box::new(MemoryCheckpointStore::new()));
        SyncLoop::new(self.config, source, processor, self.handlers, checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = SyncBuilder::new().build_config();
        assert_eq!(cfg.network, "mainnet");
        assert_eq!(cfg.checkpoint_interval, 100);
        assert_eq!(cfg.stop_height, None);
    }

    #[test]
    fn builder_custom() {
        let cfg = SyncBuilder::new()
            .id("wallet-sync")
            .network("testnet")
            .start_height(1_000)
            .stop_height(2_000)
            .batch_size(25)
            .reorg_window(50)
            .build_config();

        assert_eq!(cfg.id, "wallet-sync");
        assert_eq!(cfg.network, "testnet");
        assert_eq!(cfg.start_height, 1_000);
        assert_eq!(cfg.stop_height, Some(2_000));
        assert_eq!(cfg.batch_size, 25);
        assert_eq!(cfg.reorg_window, 50);
    }
}
