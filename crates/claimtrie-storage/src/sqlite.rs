//! SQLite storage backend.
//!
//! Persists checkpoints (with their trie snapshots), committed change sets,
//! takeover history, and block hashes to a single SQLite file. Uses `sqlx` with WAL mode for concurrent
//! read performance.
//!
//! # Usage
//! ```rust,no_run
//! use claimtrie_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./claimtrie.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use claimtrie_core::checkpoint::{Checkpoint, CheckpointStore};
use claimtrie_core::error::ClaimTrieError;
use claimtrie_core::handler::{ChangeSetHandler, ReorgHandler};
use claimtrie_core::store::TrieSnapshot;
use claimtrie_core::types::{BlockSummary, ChangeSet, ClaimHash, ClaimName, SyncContext, Takeover};

fn storage_err(e: sqlx::Error) -> ClaimTrieError {
    ClaimTrieError::Storage(e.to_string())
}

/// SQLite-backed storage for checkpoints, change sets, takeovers, and block
/// hashes. Rows are keyed by network so several networks can share a file.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./claimtrie.db"`) or a full
    /// SQLite URL (`"sqlite:./claimtrie.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ClaimTrieError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection, since every connection to `:memory:` is a
    /// separate database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, ClaimTrieError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), ClaimTrieError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                network    TEXT    NOT NULL,
                sync_id    TEXT    NOT NULL,
                height     INTEGER NOT NULL,
                block_hash TEXT    NOT NULL,
                updated_at INTEGER NOT NULL,
                snapshot   TEXT,
                PRIMARY KEY (network, sync_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_hashes (
                network    TEXT    NOT NULL,
                height     INTEGER NOT NULL,
                block_hash TEXT    NOT NULL,
                PRIMARY KEY (network, height)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS change_sets (
                network TEXT    NOT NULL,
                height  INTEGER NOT NULL,
                body    TEXT    NOT NULL,
                PRIMARY KEY (network, height)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS takeovers (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                network  TEXT    NOT NULL,
                name     BLOB    NOT NULL,
                height   INTEGER NOT NULL,
                claim_id TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_takeovers_name ON takeovers (network, name);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    // ─── Change sets ─────────────────────────────────────────────────────────

    /// Store a committed change set, its takeovers, and its block hash in one
    /// transaction.
    pub async fn insert_change_set(&self, network: &str, change_set: &ChangeSet) -> Result<(), ClaimTrieError> {
        let body = serde_json::to_string(change_set)?;
        let height = change_set.height as i64;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("INSERT OR REPLACE INTO change_sets (network, height, body) VALUES (?, ?, ?)")
            .bind(network)
            .bind(height)
            .bind(&body)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query("INSERT OR REPLACE INTO block_hashes (network, height, block_hash) VALUES (?, ?, ?)")
            .bind(network)
            .bind(height)
            .bind(&change_set.block_hash)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for takeover in &change_set.takeovers {
            sqlx::query("INSERT INTO takeovers (network, name, height, claim_id) VALUES (?, ?, ?, ?)")
                .bind(network)
                .bind(takeover.name.as_bytes())
                .bind(takeover.height as i64)
                .bind(takeover.claim_hash.claim_id())
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(network, height = change_set.height, takeovers = change_set.takeovers.len(), "change set stored");
        Ok(())
    }

    pub async fn change_set(&self, network: &str, height: u32) -> Result<Option<ChangeSet>, ClaimTrieError> {
        let row = sqlx::query("SELECT body FROM change_sets WHERE network = ? AND height = ?")
            .bind(network)
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(r) => {
                let body: String = r.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    pub async fn change_set_count(&self, network: &str) -> Result<u64, ClaimTrieError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM change_sets WHERE network = ?")
            .bind(network)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Takeover history of `name`, oldest first.
    pub async fn takeovers_for_name(&self, network: &str, name: &ClaimName) -> Result<Vec<Takeover>, ClaimTrieError> {
        let rows = sqlx::query(
            "SELECT height, claim_id FROM takeovers
             WHERE network = ? AND name = ? ORDER BY height, id",
        )
        .bind(network)
        .bind(name.as_bytes())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter()
            .map(|r| {
                let claim_id: String = r.get("claim_id");
                Ok(Takeover {
                    name: name.clone(),
                    height: r.get::<i64, _>("height") as u32,
                    claim_hash: ClaimHash::from_claim_id(&claim_id)?,
                })
            })
            .collect()
    }

    // ─── Block hashes ────────────────────────────────────────────────────────

    pub async fn block_hash(&self, network: &str, height: u32) -> Result<Option<String>, ClaimTrieError> {
        let row = sqlx::query("SELECT block_hash FROM block_hashes WHERE network = ? AND height = ?")
            .bind(network)
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| r.get::<String, _>("block_hash")))
    }

    // ─── Reorg recovery ──────────────────────────────────────────────────────

    /// Delete everything recorded for blocks **after** `height`.
    pub async fn rollback_after(&self, network: &str, height: u32) -> Result<(), ClaimTrieError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for table in ["change_sets", "block_hashes", "takeovers"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE network = ? AND height > ?"))
                .bind(network)
                .bind(height as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        debug!(network, height, "rolled back storage");
        Ok(())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, network: &str, sync_id: &str) -> Result<Option<Checkpoint>, ClaimTrieError> {
        let row = sqlx::query(
            "SELECT network, sync_id, height, block_hash, updated_at, snapshot
             FROM checkpoints WHERE network = ? AND sync_id = ?",
        )
        .bind(network)
        .bind(sync_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(r) = row else {
            return Ok(None);
        };
        let snapshot: Option<TrieSnapshot> = r
            .get::<Option<String>, _>("snapshot")
            .map(|json| serde_json::from_str(&json))
            .transpose()?;
        Ok(Some(Checkpoint {
            network: r.get("network"),
            sync_id: r.get("sync_id"),
            height: r.get::<i64, _>("height") as u32,
            block_hash: r.get("block_hash"),
            updated_at: r.get("updated_at"),
            snapshot,
        }))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ClaimTrieError> {
        let snapshot = checkpoint.snapshot.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (network, sync_id, height, block_hash, updated_at, snapshot)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.network)
        .bind(&checkpoint.sync_id)
        .bind(checkpoint.height as i64)
        .bind(&checkpoint.block_hash)
        .bind(checkpoint.updated_at)
        .bind(snapshot)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            network = %checkpoint.network,
            sync_id = %checkpoint.sync_id,
            height = checkpoint.height,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, network: &str, sync_id: &str) -> Result<(), ClaimTrieError> {
        sqlx::query("DELETE FROM checkpoints WHERE network = ? AND sync_id = ?")
            .bind(network)
            .bind(sync_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

// ─── Handler impls ───────────────────────────────────────────────────────────

#[async_trait]
impl ChangeSetHandler for SqliteStorage {
    async fn on_change_set(&self, change_set: &ChangeSet, ctx: &SyncContext) -> Result<(), ClaimTrieError> {
        self.insert_change_set(&ctx.network, change_set).await
    }

    fn name(&self) -> &str {
        "sqlite-storage"
    }
}

#[async_trait]
impl ReorgHandler for SqliteStorage {
    async fn on_reorg(&self, _dropped: &[BlockSummary], ctx: &SyncContext) -> Result<(), ClaimTrieError> {
        self.rollback_after(&ctx.network, ctx.block.height).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use claimtrie_core::store::{ClaimTrieStore, MemoryClaimTrieStore};
    use claimtrie_core::types::NameChange;

    fn change_set(height: u32, name: &str) -> ChangeSet {
        let takeover = Takeover {
            name: name.into(),
            height,
            claim_hash: ClaimHash([height as u8; 20]),
        };
        ChangeSet {
            height,
            block_hash: format!("{height:064x}"),
            changed_names: vec![NameChange {
                name: name.into(),
                new_controller: Some(takeover.claim_hash.claim_id()),
                previous_controller: None,
            }],
            newly_activated: vec![takeover.claim_hash.claim_id()],
            takeovers: vec![takeover],
        }
    }

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();

        let cp = Checkpoint {
            network: "mainnet".into(),
            sync_id: "trie".into(),
            height: 1_000,
            block_hash: "abcdef".into(),
            updated_at: 1_700_000_000,
            snapshot: None,
        };
        store.save(cp).await.unwrap();

        let loaded = store.load("mainnet", "trie").await.unwrap().unwrap();
        assert_eq!(loaded.height, 1_000);
        assert_eq!(loaded.block_hash, "abcdef");
        assert_eq!(loaded.updated_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn checkpoint_keeps_trie_snapshot() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let mut trie = MemoryClaimTrieStore::default();
        trie.record_takeover(&"foo".into(), 7, ClaimHash([7; 20])).unwrap();
        trie.checkpoint(&BlockSummary { height: 7, hash: "h7".into(), prev_hash: "h6".into() })
            .unwrap();
        let snapshot = trie.snapshot();

        store
            .save(Checkpoint {
                network: "mainnet".into(),
                sync_id: "trie".into(),
                height: 7,
                block_hash: "h7".into(),
                updated_at: 0,
                snapshot: Some(snapshot.clone()),
            })
            .await
            .unwrap();

        let loaded = store.load("mainnet", "trie").await.unwrap().unwrap();
        assert_eq!(loaded.snapshot, Some(snapshot));
    }

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for (height, hash) in [(100, "old"), (200, "new")] {
            store
                .save(Checkpoint {
                    network: "mainnet".into(),
                    sync_id: "trie".into(),
                    height,
                    block_hash: hash.into(),
                    updated_at: 0,
                    snapshot: None,
                })
                .await
                .unwrap();
        }

        let loaded = store.load("mainnet", "trie").await.unwrap().unwrap();
        assert_eq!(loaded.height, 200);
        assert_eq!(loaded.block_hash, "new");
    }

    #[tokio::test]
    async fn checkpoint_delete() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.load("testnet", "trie").await.unwrap().is_none());

        store
            .save(Checkpoint {
                network: "testnet".into(),
                sync_id: "trie".into(),
                height: 500,
                block_hash: "def".into(),
                updated_at: 0,
                snapshot: None,
            })
            .await
            .unwrap();
        store.delete("testnet", "trie").await.unwrap();
        assert!(store.load("testnet", "trie").await.unwrap().is_none());
    }

    // ── Change sets ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn change_set_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let cs = change_set(100, "foo");
        store.insert_change_set("mainnet", &cs).await.unwrap();

        assert_eq!(store.change_set("mainnet", 100).await.unwrap(), Some(cs.clone()));
        assert!(store.change_set("testnet", 100).await.unwrap().is_none());
        assert_eq!(store.block_hash("mainnet", 100).await.unwrap(), Some(cs.block_hash));

        let history = store.takeovers_for_name("mainnet", &"foo".into()).await.unwrap();
        assert_eq!(history, cs.takeovers);
    }

    // ── Reorg / rollback ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn rollback_removes_future_data() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for h in 100..=105 {
            store.insert_change_set("mainnet", &change_set(h, "foo")).await.unwrap();
        }
        store.insert_change_set("testnet", &change_set(105, "foo")).await.unwrap();
        assert_eq!(store.change_set_count("mainnet").await.unwrap(), 6);

        store.rollback_after("mainnet", 102).await.unwrap();

        assert_eq!(store.change_set_count("mainnet").await.unwrap(), 3);
        assert!(store.block_hash("mainnet", 103).await.unwrap().is_none());
        assert!(store.block_hash("mainnet", 102).await.unwrap().is_some());
        assert_eq!(store.takeovers_for_name("mainnet", &"foo".into()).await.unwrap().len(), 3);
        assert_eq!(store.change_set_count("testnet").await.unwrap(), 1);
    }
}
