//! Block source: the external node the sync loop pulls blocks from.
//!
//! Blocks are fetched by height on the source's current best chain. When
//! the processor rejects a block as inconsistent the loop asks the source
//! for a re-sync instead of skipping it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use claimtrie_core::error::ClaimTrieError;
use claimtrie_core::types::Block;

/// Access to a block-producing node.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Height of the best block, `None` if the chain is empty.
    async fn tip_height(&self) -> Result<Option<u32>, ClaimTrieError>;

    /// Block at `height` on the best chain.
    async fn block(&self, height: u32) -> Result<Option<Block>, ClaimTrieError>;

    /// Ask the node to re-deliver the chain from `height`.
    async fn request_resync(&self, height: u32, reason: &str) -> Result<(), ClaimTrieError>;
}

#[async_trait]
impl<T: BlockSource + ?Sized> BlockSource for Arc<T> {
    async fn tip_height(&self) -> Result<Option<u32>, ClaimTrieError> {
        (**self).tip_height().await
    }

    async fn block(&self, height: u32) -> Result<Option<Block>, ClaimTrieError> {
        (**self).block(height).await
    }

    async fn request_resync(&self, height: u32, reason: &str) -> Result<(), ClaimTrieError> {
        (**self).request_resync(height, reason).await
    }
}

/// Wraps a [`BlockSource`] and fetches ranges with bounded concurrency.
pub struct BlockFetcher<S> {
    source: S,
    concurrency: usize,
}

impl<S: BlockSource> BlockFetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source, concurrency: 8 }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn tip_height(&self) -> Result<Option<u32>, ClaimTrieError> {
        self.source.tip_height().await
    }

    pub async fn block(&self, height: u32) -> Result<Option<Block>, ClaimTrieError> {
        self.source.block(height).await
    }

    /// Fetch `[from, to]` in height order, stopping at the first missing block.
    pub async fn blocks(&self, from: u32, to: u32) -> Result<Vec<Block>, ClaimTrieError> {
        if to < from {
            return Ok(vec![]);
        }
        let fetched: Vec<Option<Block>> = stream::iter(from..=to)
            .map(|height| self.source.block(height))
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        Ok(fetched.into_iter().map_while(|b| b).collect())
    }

    pub async fn request_resync(&self, height: u32, reason: &str) -> Result<(), ClaimTrieError> {
        self.source.request_resync(height, reason).await
    }
}

// ─── In-memory source ─────────────────────────────────────────────────────────

/// A re-sync request received by [`MemoryBlockSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncRequest {
    pub height: u32,
    pub reason: String,
}

/// A chain held in memory. Used by tests and for replaying block files.
#[derive(Default)]
pub struct MemoryBlockSource {
    chain: Mutex<Vec<Block>>,
    resyncs: Mutex<Vec<ResyncRequest>>,
}

impl MemoryBlockSource {
    /// `blocks` must be consecutive, lowest height first.
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            chain: Mutex::new(blocks),
            resyncs: Mutex::new(vec![]),
        }
    }

    /// Load a JSON array of blocks.
    pub fn from_json(json: &str) -> Result<Self, ClaimTrieError> {
        let blocks: Vec<Block> = serde_json::from_str(json)?;
        for pair in blocks.windows(2) {
            if pair[1].height != pair[0].height + 1 {
                return Err(ClaimTrieError::Source(format!(
                    "block {} follows block {}",
                    pair[1].height, pair[0].height
                )));
            }
        }
        Ok(Self::new(blocks))
    }

    fn chain(&self) -> MutexGuard<'_, Vec<Block>> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, block: Block) {
        self.chain().push(block);
    }

    /// Drop every block at or above `height` and append `blocks`.
    pub fn replace_from(&self, height: u32, blocks: Vec<Block>) {
        let mut chain = self.chain();
        chain.retain(|b| b.height < height);
        chain.extend(blocks);
    }

    pub fn first_height(&self) -> Option<u32> {
        self.chain().first().map(|b| b.height)
    }

    pub fn len(&self) -> usize {
        self.chain().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain().is_empty()
    }

    pub fn resync_requests(&self) -> Vec<ResyncRequest> {
        self.resyncs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn tip_height(&self) -> Result<Option<u32>, ClaimTrieError> {
        Ok(self.chain().last().map(|b| b.height))
    }

    async fn block(&self, height: u32) -> Result<Option<Block>, ClaimTrieError> {
        let chain = self.chain();
        let Some(first) = chain.first().map(|b| b.height) else {
            return Ok(None);
        };
        let Some(index) = height.checked_sub(first) else {
            return Ok(None);
        };
        Ok(chain.get(index as usize).cloned())
    }

    async fn request_resync(&self, height: u32, reason: &str) -> Result<(), ClaimTrieError> {
        self.resyncs
            .lock()
            .map_err(|e| ClaimTrieError::Source(format!("resync log poisoned: {e}")))?
            .push(ResyncRequest { height, reason: reason.to_string() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u32) -> Block {
        Block {
            height,
            hash: format!("b{height}"),
            prev_hash: format!("b{}", height.saturating_sub(1)),
            transactions: vec![],
        }
    }

    #[tokio::test]
    async fn fetches_ranges_in_order() {
        let source = MemoryBlockSource::new((5..=20).map(block).collect());
        let fetcher = BlockFetcher::new(source).with_concurrency(3);
        let blocks = fetcher.blocks(8, 12).await.unwrap();
        assert_eq!(blocks.iter().map(|b| b.height).collect::<Vec<_>>(), vec![8, 9, 10, 11, 12]);
        assert!(fetcher.blocks(12, 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn range_stops_at_tip() {
        let fetcher = BlockFetcher::new(MemoryBlockSource::new((1..=3).map(block).collect()));
        assert_eq!(fetcher.blocks(2, 10).await.unwrap().len(), 2);
        assert!(fetcher.block(0).await.unwrap().is_none());
        assert_eq!(fetcher.tip_height().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn replace_from_switches_branch() {
        let source = MemoryBlockSource::new((1..=5).map(block).collect());
        let mut alt = block(4);
        alt.hash = "alt4".into();
        source.replace_from(4, vec![alt]);
        assert_eq!(source.tip_height().await.unwrap(), Some(4));
        assert_eq!(source.block(4).await.unwrap().unwrap().hash, "alt4");
    }

    #[tokio::test]
    async fn records_resync_requests() {
        let source = MemoryBlockSource::default();
        assert_eq!(source.tip_height().await.unwrap(), None);
        source.request_resync(7, "bad spend").await.unwrap();
        assert_eq!(
            source.resync_requests(),
            vec![ResyncRequest { height: 7, reason: "bad spend".into() }]
        );
    }

    #[test]
    fn json_must_be_consecutive() {
        let json = serde_json::to_string(&vec![block(1), block(3)]).unwrap();
        assert!(matches!(MemoryBlockSource::from_json(&json), Err(ClaimTrieError::Source(_))));
        let json = serde_json::to_string(&vec![block(1), block(2)]).unwrap();
        let source = MemoryBlockSource::from_json(&json).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.first_height(), Some(1));
    }
}
