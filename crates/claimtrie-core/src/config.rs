//! Sync loop configuration and state types.

use serde::{Deserialize, Serialize};

/// Configuration for a sync loop instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Unique name for this sync loop (used for checkpoint keys).
    pub id: String,
    /// Network slug (e.g. `"mainnet"`).
    pub network: String,
    /// First height to process when the trie is empty.
    pub start_height: u32,
    /// Optional last height. `None` = follow the tip forever.
    pub stop_height: Option<u32>,
    /// Blocks fetched per backfill batch.
    pub batch_size: u32,
    /// Tip polling interval in live mode (milliseconds).
    pub poll_interval_ms: u64,
    /// How often to save a checkpoint (every N blocks).
    pub checkpoint_interval: u32,
    /// Number of recent blocks tracked for fork detection. Should not exceed
    /// the network's `undo_depth`.
    pub reorg_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            id: "claimtrie".into(),
            network: "mainnet".into(),
            start_height: 0,
            stop_height: None,
            batch_size: 100,
            poll_interval_ms: 2000,
            checkpoint_interval: 100,
            reorg_window: 200,
        }
    }
}

/// Runtime state of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    /// Processing historical blocks up to the source tip.
    Backfilling,
    /// Following the tip.
    Live,
    /// Rolling back after a fork.
    ReorgRecovery,
    /// Stopped after reaching `stop_height`.
    Stopped,
    /// A block was rejected; a re-sync has been requested.
    Error,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: SyncConfig = serde_json::from_str(r#"{ "network": "testnet", "stop_height": 10 }"#).unwrap();
        assert_eq!(cfg.network, "testnet");
        assert_eq!(cfg.stop_height, Some(10));
        assert_eq!(cfg.checkpoint_interval, 100);
        assert_eq!(cfg.id, "claimtrie");
    }
}
