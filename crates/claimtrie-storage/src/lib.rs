//! claimtrie-storage — storage backends for claim trie sync data.
//!
//! Both backends persist checkpoints, committed change sets, takeover
//! history and block hashes, and plug into the sync loop as change-set and
//! reorg handlers.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
