//! The sync loop: drives the block processor from a block source.
//!
//! # Resume
//! A saved checkpoint ahead of the trie tip is restored from the trie
//! snapshot it carries; syncing continues at the block after it.
//!
//! # Phase 1: BACKFILL
//! Fetch blocks from the trie tip (or `start_height`) up to the source tip
//! in batches. Each block is processed, its change set dispatched, and a
//! checkpoint saved every `checkpoint_interval` blocks.
//!
//! # Phase 2: LIVE
//! Poll the source tip every `poll_interval_ms` and process new blocks the
//! same way.
//!
//! In both phases a block whose parent is not our head triggers a rollback
//! to the last common block, after which processing resumes on the new
//! branch. A block the processor rejects as inconsistent stops the loop and
//! asks the source for a re-sync.

use std::time::Duration;

use claimtrie_core::checkpoint::{Checkpoint, CheckpointManager, CheckpointStore};
use claimtrie_core::config::{SyncConfig, SyncState};
use claimtrie_core::error::ClaimTrieError;
use claimtrie_core::handler::HandlerRegistry;
use claimtrie_core::processor::BlockProcessor;
use claimtrie_core::reorg::{ReorgDetector, ReorgEvent, ReorgType};
use claimtrie_core::store::{ClaimTrieStore, MemoryClaimTrieStore};
use claimtrie_core::tracker::BlockTracker;
use claimtrie_core::types::{Block, BlockSummary, SyncContext, SyncPhase};

use crate::source::{BlockFetcher, BlockSource};

/// Forks at most this many blocks deep are logged as short reorgs.
const SHORT_REORG_DEPTH: u32 = 6;

enum Step {
    Committed,
    RolledBack,
}

pub struct SyncLoop<S: BlockSource, T: ClaimTrieStore = MemoryClaimTrieStore> {
    config: SyncConfig,
    fetcher: BlockFetcher<S>,
    processor: BlockProcessor<T>,
    tracker: BlockTracker,
    reorg_detector: ReorgDetector,
    checkpoint: CheckpointManager,
    handlers: HandlerRegistry,
    state: SyncState,
}

impl<S: BlockSource, T: ClaimTrieStore> SyncLoop<S, T> {
    pub fn new(
        config: SyncConfig,
        source: S,
        processor: BlockProcessor<T>,
        handlers: HandlerRegistry,
        checkpoints: Box<dyn CheckpointStore>,
    ) -> Self {
        let undo_depth = processor.params().undo_depth;
        if config.reorg_window as u64 > undo_depth as u64 {
            tracing::warn!(
                reorg_window = config.reorg_window,
                undo_depth,
                "Reorg window is deeper than the undo journal; deep forks will need a re-sync"
            );
        }
        let checkpoint = CheckpointManager::new(
            checkpoints,
            config.network.clone(),
            config.id.clone(),
            config.checkpoint_interval,
        );
        Self {
            fetcher: BlockFetcher::new(source),
            processor,
            tracker: BlockTracker::new(config.reorg_window),
            reorg_detector: ReorgDetector::new(SHORT_REORG_DEPTH),
            checkpoint,
            handlers,
            state: SyncState::Idle,
            config,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn processor(&self) -> &BlockProcessor<T> {
        &self.processor
    }

    pub fn into_processor(self) -> BlockProcessor<T> {
        self.processor
    }

    pub fn tracker(&self) -> &BlockTracker {
        &self.tracker
    }

    pub fn source(&self) -> &S {
        self.fetcher.source()
    }

    /// Run until `stop_height` is reached or an error occurs. Without a
    /// `stop_height` this follows the tip forever.
    pub async fn run(&mut self) -> Result<(), ClaimTrieError> {
        if let Some(cp) = self.checkpoint.load().await? {
            self.resume_from(cp)?;
        }

        // Phase 1: Backfill
        self.state = SyncState::Backfilling;
        let tip = self.fetcher.tip_height().await?;
        tracing::info!(from = self.next_height(), source_tip = ?tip, "Starting backfill phase");
        if let Some(target) = self.target(tip) {
            self.sync_to(target).await?;
        }
        if self.reached_stop() {
            return self.stop().await;
        }
        tracing::info!(at = ?self.processor.tip().map(|t| t.height), "Backfill complete");

        // Phase 2: Live
        self.state = SyncState::Live;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            tokio::time::sleep(poll_interval).await;

            let Some(tip) = self.fetcher.tip_height().await? else {
                continue;
            };
            if let Some(event) = self.reorg_detector.check_tip(tip, &self.tracker.blocks()) {
                self.recover(event).await?;
            }
            if let Some(target) = self.target(Some(tip)) {
                self.sync_to(target).await?;
            }
            if self.reached_stop() {
                return self.stop().await;
            }
        }
    }

    /// Process blocks until the trie tip reaches `target` or the source runs
    /// out of blocks. Returns the resulting tip height.
    pub async fn sync_to(&mut self, target: u32) -> Result<Option<u32>, ClaimTrieError> {
        let batch = self.config.batch_size.max(1);

        loop {
            let next = self.next_height();
            if next > target {
                break;
            }
            let batch_end = next.saturating_add(batch - 1).min(target);
            let blocks = self.fetcher.blocks(next, batch_end).await?;
            if blocks.is_empty() {
                break;
            }

            let mut committed = 0usize;
            for block in &blocks {
                match self.step(block).await? {
                    Step::Committed => committed += 1,
                    Step::RolledBack => break,
                }
            }

            if self.phase() == SyncPhase::Backfill {
                tracing::info!(from = next, to = batch_end, committed, target, "Backfill batch complete");
            }
        }

        Ok(self.processor.tip().map(|t| t.height))
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    /// Bring the trie up to a saved checkpoint. A trie already at or past the
    /// checkpoint is kept as it is.
    fn resume_from(&mut self, cp: Checkpoint) -> Result<(), ClaimTrieError> {
        let trie_tip = self.processor.tip().map(|t| t.height);
        if trie_tip.is_some_and(|h| h >= cp.height) {
            tracing::info!(height = cp.height, hash = %cp.block_hash, ?trie_tip, "Trie is already past checkpoint");
            return Ok(());
        }

        let Some(snapshot) = cp.snapshot else {
            return Err(ClaimTrieError::InvalidState(format!(
                "checkpoint at height {} is ahead of trie tip {trie_tip:?} and carries no trie snapshot",
                cp.height
            )));
        };
        let tip = snapshot
            .tip
            .clone()
            .filter(|t| t.height == cp.height && t.hash == cp.block_hash)
            .ok_or_else(|| {
                ClaimTrieError::InvalidState(format!(
                    "checkpoint snapshot does not end at block {} ({})",
                    cp.height, cp.block_hash
                ))
            })?;

        self.processor.restore(snapshot)?;
        self.tracker = BlockTracker::new(self.config.reorg_window);
        self.tracker.push(tip.clone()).map_err(|depth| {
            ClaimTrieError::InvalidState(format!("restored tip {} rejected by tracker (depth {depth})", tip.height))
        })?;
        tracing::info!(height = tip.height, hash = %tip.hash, "Resumed from checkpoint");
        Ok(())
    }

    fn next_height(&self) -> u32 {
        self.processor
            .tip()
            .map(|t| t.height + 1)
            .unwrap_or(self.config.start_height)
    }

    fn target(&self, source_tip: Option<u32>) -> Option<u32> {
        let tip = source_tip?;
        Some(self.config.stop_height.map_or(tip, |stop| stop.min(tip)))
    }

    fn reached_stop(&self) -> bool {
        match (self.config.stop_height, self.processor.tip()) {
            (Some(stop), Some(tip)) => tip.height >= stop,
            _ => false,
        }
    }

    fn phase(&self) -> SyncPhase {
        match self.state {
            SyncState::Live => SyncPhase::Live,
            _ => SyncPhase::Backfill,
        }
    }

    fn context(&self, block: BlockSummary) -> SyncContext {
        SyncContext {
            block,
            phase: self.phase(),
            network: self.config.network.clone(),
        }
    }

    async fn stop(&mut self) -> Result<(), ClaimTrieError> {
        if let Some(tip) = self.processor.tip() {
            self.checkpoint.force_save(tip.height, &tip.hash, self.processor.snapshot()).await?;
            tracing::info!(height = tip.height, "Reached stop height");
        }
        self.state = SyncState::Stopped;
        Ok(())
    }

    async fn step(&mut self, block: &Block) -> Result<Step, ClaimTrieError> {
        let summary = block.summary();
        if let Some(head) = self.tracker.head().cloned() {
            if let Some(event) = self.reorg_detector.check(&summary, &head, &self.tracker.blocks()) {
                self.recover(event).await?;
                return Ok(Step::RolledBack);
            }
        }

        match self.processor.process_block(block) {
            Ok(change_set) => {
                self.tracker.push(summary.clone()).map_err(|depth| {
                    ClaimTrieError::InvalidState(format!(
                        "block {} committed but does not extend the tracked head (depth {depth})",
                        block.height
                    ))
                })?;
                let ctx = self.context(summary);
                self.handlers.dispatch_change_set(&change_set, &ctx).await?;
                let processor = &self.processor;
                self.checkpoint
                    .maybe_save(block.height, &block.hash, || processor.snapshot())
                    .await?;
                Ok(Step::Committed)
            }
            Err(err) if err.is_fatal_for_block() || err.is_reorg() => {
                self.fail(block.height, &err).await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Roll the trie back to the last block shared with the source.
    async fn recover(&mut self, event: ReorgEvent) -> Result<(), ClaimTrieError> {
        let resume = self.state;
        self.state = SyncState::ReorgRecovery;

        let common = match (event.reorg_type, event.common_height) {
            (ReorgType::ShortReorg | ReorgType::DeepReorg, Some(height)) => Some(height),
            (_, upper) => {
                let upper = upper
                    .or_else(|| self.tracker.head().map(|b| b.height))
                    .unwrap_or(0);
                self.find_common_height(upper).await?
            }
        };
        let Some(common) = common else {
            let err = ClaimTrieError::ReorgRequired {
                height: event.detected_at,
                reason: format!("fork is deeper than the {} tracked blocks", self.tracker.len()),
            };
            let from = self.tracker.oldest().map(|b| b.height).unwrap_or(event.detected_at);
            self.fail(from, &err).await?;
            return Err(err);
        };

        tracing::warn!(
            common,
            depth = event.depth,
            reorg_type = %event.reorg_type,
            "Rolling back to common ancestor"
        );
        if let Err(err) = self.processor.rollback_to(common) {
            self.fail(common, &err).await?;
            return Err(err);
        }

        let dropped: Vec<BlockSummary> = self
            .tracker
            .blocks()
            .into_iter()
            .rev()
            .filter(|b| b.height > common)
            .collect();
        self.tracker.rewind_to(common);

        let head = self
            .tracker
            .head()
            .cloned()
            .or_else(|| self.processor.tip())
            .ok_or_else(|| ClaimTrieError::InvalidState(format!("no block at common height {common}")))?;
        self.state = resume;
        let ctx = self.context(head.clone());
        self.handlers.dispatch_reorg(&dropped, &ctx).await?;
        self.checkpoint.force_save(head.height, &head.hash, self.processor.snapshot()).await?;
        Ok(())
    }

    /// Highest tracked block at or below `upper` that the source still has.
    async fn find_common_height(&self, upper: u32) -> Result<Option<u32>, ClaimTrieError> {
        for tracked in self.tracker.blocks().iter().rev().filter(|b| b.height <= upper) {
            if let Some(remote) = self.fetcher.block(tracked.height).await? {
                if remote.hash == tracked.hash {
                    return Ok(Some(tracked.height));
                }
            }
        }
        Ok(None)
    }

    async fn fail(&mut self, height: u32, err: &ClaimTrieError) -> Result<(), ClaimTrieError> {
        self.state = SyncState::Error;
        tracing::error!(height, error = %err, "Requesting re-sync from block source");
        self.fetcher.request_resync(height, &err.to_string()).await
    }
}
