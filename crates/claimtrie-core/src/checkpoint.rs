//! Checkpoint manager — persists the sync position for crash recovery.
//!
//! A checkpoint stores the last committed block height and hash, and a
//! snapshot of the trie at that block when the store can export one. On
//! restart the sync loop restores the snapshot and resumes at the next block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClaimTrieError;
use crate::store::TrieSnapshot;

/// A persisted checkpoint for a sync loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Network slug (e.g. `"mainnet"`).
    pub network: String,
    /// Identifier of the sync loop.
    pub sync_id: String,
    pub height: u32,
    pub block_hash: String,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
    /// Trie state as of `height`.
    #[serde(default)]
    pub snapshot: Option<TrieSnapshot>,
}

/// Storage for checkpoints.
///
/// Implemented by [`MemoryCheckpointStore`] here and by the backends of the
/// storage crate.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, network: &str, sync_id: &str) -> Result<Option<Checkpoint>, ClaimTrieError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ClaimTrieError>;

    async fn delete(&self, network: &str, sync_id: &str) -> Result<(), ClaimTrieError>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self, network: &str, sync_id: &str) -> Result<Option<Checkpoint>, ClaimTrieError> {
        (**self).load(network, sync_id).await
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ClaimTrieError> {
        (**self).save(checkpoint).await
    }

    async fn delete(&self, network: &str, sync_id: &str) -> Result<(), ClaimTrieError> {
        (**self).delete(network, sync_id).await
    }
}

/// Manages checkpoint reads/writes for one sync loop.
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    network: String,
    sync_id: String,
    /// Save every N committed blocks.
    save_interval: u32,
    counter: u32,
}

impl CheckpointManager {
    pub fn new(
        store: Box<dyn CheckpointStore>,
        network: impl Into<String>,
        sync_id: impl Into<String>,
        save_interval: u32,
    ) -> Self {
        Self {
            store,
            network: network.into(),
            sync_id: sync_id.into(),
            save_interval: save_interval.max(1),
            counter: 0,
        }
    }

    pub async fn load(&self) -> Result<Option<Checkpoint>, ClaimTrieError> {
        self.store.load(&self.network, &self.sync_id).await
    }

    /// Save a checkpoint every `save_interval` calls. `snapshot` is only
    /// invoked when a checkpoint is actually written.
    pub async fn maybe_save(
        &mut self,
        height: u32,
        block_hash: &str,
        snapshot: impl FnOnce() -> Option<TrieSnapshot>,
    ) -> Result<(), ClaimTrieError> {
        self.counter += 1;
        if self.counter >= self.save_interval {
            self.force_save(height, block_hash, snapshot()).await?;
            self.counter = 0;
        }
        Ok(())
    }

    /// Save immediately (shutdown, after a rollback).
    pub async fn force_save(
        &self,
        height: u32,
        block_hash: &str,
        snapshot: Option<TrieSnapshot>,
    ) -> Result<(), ClaimTrieError> {
        let cp = Checkpoint {
            network: self.network.clone(),
            sync_id: self.sync_id.clone(),
            height,
            block_hash: block_hash.to_string(),
            updated_at: chrono::Utc::now().timestamp(),
            snapshot,
        };
        self.store.save(cp).await
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(network: &str, sync_id: &str) -> String {
        format!("{network}:{sync_id}")
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, ClaimTrieError> {
        self.data
            .lock()
            .map_err(|e| ClaimTrieError::Storage(format!("checkpoint store poisoned: {e}")))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, network: &str, sync_id: &str) -> Result<Option<Checkpoint>, ClaimTrieError> {
        Ok(self.lock()?.get(&Self::key(network, sync_id)).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ClaimTrieError> {
        let key = Self::key(&checkpoint.network, &checkpoint.sync_id);
        self.lock()?.insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, network: &str, sync_id: &str) -> Result<(), ClaimTrieError> {
        self.lock()?.remove(&Self::key(network, sync_id));
        Ok(())
    }
}
