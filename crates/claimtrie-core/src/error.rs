//! Error types for the claim trie pipeline.

use thiserror::Error;

/// Errors that can occur while extracting, applying or resolving a block.
#[derive(Debug, Error)]
pub enum ClaimTrieError {
    #[error("Malformed claim output {txo}: {reason}")]
    MalformedEvent { txo: String, reason: String },

    #[error("Inconsistent spend at height {height}: {txo} is not a tracked claim or support")]
    InconsistentSpend { height: u32, txo: String },

    #[error("Claim {claim_id} referenced at height {height} does not exist")]
    MissingClaim { height: u32, claim_id: String },

    #[error("Invalid claim id: {0}")]
    InvalidClaimId(String),

    #[error("Reorg required at height {height}: {reason}")]
    ReorgRequired { height: u32, reason: String },

    #[error("Cannot roll back to height {target}: undo journal only reaches height {oldest}")]
    RollbackTooDeep { target: u32, oldest: u32 },

    #[error("Missing network parameter: {field}")]
    ConfigMissing { field: String },

    #[error("Invalid network parameters: {reason}")]
    ConfigInvalid { reason: String },

    #[error("Invalid processor state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Block source error: {0}")]
    Source(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ClaimTrieError {
    /// Returns `true` if the error signals a chain reorganization (recoverable by rollback).
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgRequired { .. })
    }

    /// Returns `true` if the block cannot be committed and the block source
    /// has to be asked for a re-sync.
    pub fn is_fatal_for_block(&self) -> bool {
        matches!(
            self,
            Self::InconsistentSpend { .. } | Self::MissingClaim { .. }
        )
    }

    /// Returns `true` for errors that are handled locally without aborting
    /// block processing.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedEvent { .. } | Self::ReorgRequired { .. })
    }
}
