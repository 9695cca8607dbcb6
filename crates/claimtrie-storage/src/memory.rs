//! In-memory storage backend.
//!
//! Stores committed change sets, takeover history, block hashes, and
//! checkpoints in RAM. Useful for testing and short-lived replays that
//! don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use claimtrie_core::checkpoint::{Checkpoint, CheckpointStore};
use claimtrie_core::error::ClaimTrieError;
use claimtrie_core::handler::{ChangeSetHandler, ReorgHandler};
use claimtrie_core::types::{BlockSummary, ChangeSet, ClaimName, SyncContext, Takeover};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory sync storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    change_sets: Mutex<BTreeMap<u32, ChangeSet>>,
    takeovers: Mutex<Vec<Takeover>>,
    block_hashes: Mutex<BTreeMap<u32, String>>,
    reorgs: Mutex<u32>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed change set with its takeovers and block hash.
    pub fn insert_change_set(&self, change_set: &ChangeSet) {
        lock(&self.takeovers).extend(change_set.takeovers.iter().cloned());
        lock(&self.block_hashes).insert(change_set.height, change_set.block_hash.clone());
        lock(&self.change_sets).insert(change_set.height, change_set.clone());
    }

    pub fn change_set(&self, height: u32) -> Option<ChangeSet> {
        lock(&self.change_sets).get(&height).cloned()
    }

    /// All change sets, lowest height first.
    pub fn change_sets(&self) -> Vec<ChangeSet> {
        lock(&self.change_sets).values().cloned().collect()
    }

    pub fn change_set_count(&self) -> usize {
        lock(&self.change_sets).len()
    }

    /// Takeover history of `name`, oldest first.
    pub fn takeovers_for_name(&self, name: &ClaimName) -> Vec<Takeover> {
        lock(&self.takeovers)
            .iter()
            .filter(|t| &t.name == name)
            .cloned()
            .collect()
    }

    pub fn block_hash(&self, height: u32) -> Option<String> {
        lock(&self.block_hashes).get(&height).cloned()
    }

    /// Number of rollbacks applied so far.
    pub fn reorg_count(&self) -> u32 {
        *lock(&self.reorgs)
    }

    /// Delete everything recorded for blocks after `height` (reorg recovery).
    pub fn rollback_after(&self, height: u32) {
        lock(&self.change_sets).retain(|h, _| *h <= height);
        lock(&self.takeovers).retain(|t| t.height <= height);
        lock(&self.block_hashes).retain(|h, _| *h <= height);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, network: &str, sync_id: &str) -> Result<Option<Checkpoint>, ClaimTrieError> {
        let key = format!("{network}:{sync_id}");
        Ok(lock(&self.checkpoints).get(&key).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ClaimTrieError> {
        let key = format!("{}:{}", checkpoint.network, checkpoint.sync_id);
        lock(&self.checkpoints).insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, network: &str, sync_id: &str) -> Result<(), ClaimTrieError> {
        let key = format!("{network}:{sync_id}");
        lock(&self.checkpoints).remove(&key);
        Ok(())
    }
}

#[async_trait]
impl ChangeSetHandler for InMemoryStorage {
    async fn on_change_set(&self, change_set: &ChangeSet, _ctx: &SyncContext) -> Result<(), ClaimTrieError> {
        self.insert_change_set(change_set);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory-storage"
    }
}

#[async_trait]
impl ReorgHandler for InMemoryStorage {
    async fn on_reorg(&self, dropped: &[BlockSummary], ctx: &SyncContext) -> Result<(), ClaimTrieError> {
        self.rollback_after(ctx.block.height);
        *lock(&self.reorgs) += 1;
        tracing::debug!(common = ctx.block.height, dropped = dropped.len(), "Storage rolled back");
        Ok(())
    }
}
