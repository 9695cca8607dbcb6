//! claimtrie-core — claim trie consensus: which claim controls each name at
//! every height.
//!
//! # Architecture
//!
//! ```text
//! Block ──► EventExtractor ──► BlockProcessor ──► ChangeSet
//!                                  ├── ActivationScheduler (delay rules, NetworkParams)
//!                                  ├── TakeoverResolver    (ranking, takeovers)
//!                                  └── ClaimTrieStore      (records + undo journal)
//!
//! driver side: BlockTracker, ReorgDetector, CheckpointManager, HandlerRegistry
//! ```

pub mod activation;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod normalize;
pub mod params;
pub mod processor;
pub mod reorg;
pub mod script;
pub mod store;
pub mod takeover;
pub mod tracker;
pub mod types;

pub use activation::{ActivationScheduler, ActivationSubject};
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{SyncConfig, SyncState};
pub use error::ClaimTrieError;
pub use extractor::{ClaimEvent, EventExtractor, Extraction};
pub use handler::{ChangeSetHandler, HandlerRegistry, ReorgHandler};
pub use normalize::Normalization;
pub use params::{DelayException, DelayFormula, ExpirationParams, NetworkParams};
pub use processor::{BlockProcessor, ProcessorState};
pub use reorg::{ReorgDetector, ReorgEvent, ReorgType};
pub use script::ClaimScript;
pub use store::{ClaimTrieStore, MemoryClaimTrieStore, TrieSnapshot};
pub use takeover::TakeoverResolver;
pub use tracker::BlockTracker;
pub use types::{
    Block, BlockSummary, ChangeSet, ClaimHash, ClaimName, ClaimRecord, NameChange, NameState,
    OutputPayload, SupportRecord, SyncContext, SyncPhase, Takeover, Transaction, TxOutput, TxPosition,
};
