//! claimtrie-sync — block source and sync loop for the claim trie.

pub mod builder;
pub mod source;
pub mod sync_loop;

pub use builder::SyncBuilder;
pub use source::{BlockFetcher, BlockSource, MemoryBlockSource, ResyncRequest};
pub use sync_loop::SyncLoop;
