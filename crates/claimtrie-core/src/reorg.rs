//! Reorg detection.
//!
//! Two situations force a rollback of the claim trie:
//! 1. **Fork**: the next block's parent hash is not the hash of our head.
//! 2. **Shorter chain**: the block source reports a tip below our head.
//!
//! In both cases the driver locates the last common height, rolls the trie
//! back to it and reprocesses from there.

use crate::types::BlockSummary;

/// Describes a detected chain reorganization.
#[derive(Debug, Clone)]
pub struct ReorgEvent {
    /// Height at which the reorg was noticed.
    pub detected_at: u32,
    /// Last height known to be shared with the new chain, if it is inside
    /// the tracked window.
    pub common_height: Option<u32>,
    /// Blocks that have to be rolled back, most recent first.
    pub dropped_blocks: Vec<BlockSummary>,
    pub depth: u32,
    pub reorg_type: ReorgType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgType {
    /// Parent hash mismatch with the fork point close to the head.
    ShortReorg,
    /// Parent hash mismatch with the fork point deep or outside the window.
    DeepReorg,
    /// The block source tip is below the processed head.
    ShorterChain,
}

impl std::fmt::Display for ReorgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortReorg => write!(f, "short reorg"),
            Self::DeepReorg => write!(f, "deep reorg"),
            Self::ShorterChain => write!(f, "shorter chain"),
        }
    }
}

/// Detects and classifies chain reorganizations.
pub struct ReorgDetector {
    /// Forks at most this deep are classified as short.
    short_depth: u32,
}

impl ReorgDetector {
    pub fn new(short_depth: u32) -> Self {
        Self { short_depth }
    }

    /// Check whether `new_block` extends `previous_head`.
    ///
    /// `window` is the tracked chain, oldest first.
    pub fn check(
        &self,
        new_block: &BlockSummary,
        previous_head: &BlockSummary,
        window: &[BlockSummary],
    ) -> Option<ReorgEvent> {
        if new_block.extends(previous_head) {
            return None;
        }
        let (dropped, common_height) = find_dropped_blocks(new_block, window);
        let depth = dropped.len() as u32;
        let reorg_type = if common_height.is_some() && depth <= self.short_depth {
            ReorgType::ShortReorg
        } else {
            ReorgType::DeepReorg
        };
        tracing::warn!(
            depth,
            at = new_block.height,
            common_height = ?common_height,
            reorg_type = %reorg_type,
            "Reorg detected"
        );
        Some(ReorgEvent {
            detected_at: new_block.height,
            common_height,
            dropped_blocks: dropped,
            depth,
            reorg_type,
        })
    }

    /// Check whether the block source has fallen behind the processed head.
    pub fn check_tip(&self, source_tip: u32, window: &[BlockSummary]) -> Option<ReorgEvent> {
        let head = window.last()?;
        if source_tip >= head.height {
            return None;
        }
        let dropped: Vec<BlockSummary> = window
            .iter()
            .rev()
            .filter(|b| b.height > source_tip)
            .cloned()
            .collect();
        tracing::warn!(
            head = head.height,
            source_tip,
            "Block source tip is below the processed head"
        );
        Some(ReorgEvent {
            detected_at: source_tip,
            common_height: Some(source_tip),
            depth: dropped.len() as u32,
            dropped_blocks: dropped,
            reorg_type: ReorgType::ShorterChain,
        })
    }
}

/// Walk the window backward to the block `new_block` builds on.
fn find_dropped_blocks(new_block: &BlockSummary, window: &[BlockSummary]) -> (Vec<BlockSummary>, Option<u32>) {
    let mut dropped = Vec::new();
    for block in window.iter().rev() {
        if block.hash == new_block.prev_hash {
            return (dropped, Some(block.height));
        }
        dropped.push(block.clone());
    }
    (dropped, None)
}
