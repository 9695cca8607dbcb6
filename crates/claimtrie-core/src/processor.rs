//! Block processor: applies one block at a time to the claim trie.
//!
//! Per block the processor moves through
//! `Idle -> Extracting -> Mutating -> Resolving -> Committed`:
//!
//! 1. **Extracting**: classify outputs into [`ClaimEvent`]s.
//! 2. **Mutating**: apply events in on-chain order. Activation heights are
//!    computed from the name state as of the previous block, since name state
//!    only changes in the next phase. Expired claims and supports are removed.
//! 3. **Resolving**: every name touched by the block, plus every name with a
//!    claim or support activating at this height, is resolved and takeovers
//!    are recorded.
//! 4. **Committed**: the store is checkpointed and a [`ChangeSet`] returned.
//!
//! Any error before the checkpoint reverts every mutation of the block.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::activation::{ActivationScheduler, ActivationSubject};
use crate::error::ClaimTrieError;
use crate::extractor::{ClaimEvent, EventExtractor};
use crate::params::NetworkParams;
use crate::store::{ClaimTrieStore, MemoryClaimTrieStore, Removed, TrieSnapshot};
use crate::takeover::TakeoverResolver;
use crate::types::{
    Block, BlockSummary, ChangeSet, ClaimHash, ClaimName, ClaimRecord, NameChange, SupportRecord,
};

/// Phase of the block currently being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorState {
    Idle,
    Extracting,
    Mutating,
    Resolving,
    Committed,
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Extracting => write!(f, "extracting"),
            Self::Mutating => write!(f, "mutating"),
            Self::Resolving => write!(f, "resolving"),
            Self::Committed => write!(f, "committed"),
        }
    }
}

pub struct BlockProcessor<S: ClaimTrieStore = MemoryClaimTrieStore> {
    store: S,
    params: NetworkParams,
    extractor: EventExtractor,
    state: ProcessorState,
}

impl BlockProcessor<MemoryClaimTrieStore> {
    /// Processor over a fresh in-memory store sized to `params.undo_depth`.
    pub fn in_memory(params: NetworkParams) -> Result<Self, ClaimTrieError> {
        let store = MemoryClaimTrieStore::new(params.undo_depth);
        Self::new(store, params)
    }
}

impl<S: ClaimTrieStore> BlockProcessor<S> {
    pub fn new(store: S, params: NetworkParams) -> Result<Self, ClaimTrieError> {
        params.validate()?;
        Ok(Self {
            extractor: EventExtractor::new(params.normalization),
            store,
            params,
            state: ProcessorState::Idle,
        })
    }

    /// Apply `block` on top of the current tip.
    ///
    /// Fails with [`ClaimTrieError::ReorgRequired`] if the block does not
    /// extend the tip. On any failure the store is left exactly as it was.
    pub fn process_block(&mut self, block: &Block) -> Result<ChangeSet, ClaimTrieError> {
        if let Some(tip) = self.store.tip() {
            let summary = block.summary();
            if !summary.extends(&tip) {
                return Err(ClaimTrieError::ReorgRequired {
                    height: block.height,
                    reason: format!(
                        "block {} (parent {}) does not extend tip {} at height {}",
                        block.hash, block.prev_hash, tip.hash, tip.height
                    ),
                });
            }
        }

        match self.apply_block(block) {
            Ok(change_set) => {
                self.state = ProcessorState::Committed;
                Ok(change_set)
            }
            Err(err) => {
                tracing::error!(height = block.height, phase = %self.state, error = %err, "Block rejected, reverting");
                if let Err(revert_err) = self.store.revert_pending() {
                    tracing::error!(height = block.height, error = %revert_err, "Revert failed");
                }
                self.state = ProcessorState::Idle;
                Err(err)
            }
        }
    }

    /// Undo every block above `height`.
    pub fn rollback_to(&mut self, height: u32) -> Result<(), ClaimTrieError> {
        tracing::warn!(from = ?self.store.tip_height(), to = height, "Rolling back claim trie");
        self.store.rollback_to(height)?;
        self.state = ProcessorState::Idle;
        Ok(())
    }

    /// Committed trie state, for checkpoints. `None` if the store cannot
    /// export one.
    pub fn snapshot(&self) -> Option<TrieSnapshot> {
        self.store.export_snapshot()
    }

    /// Replace the trie with a snapshot saved at an earlier checkpoint.
    pub fn restore(&mut self, snapshot: TrieSnapshot) -> Result<(), ClaimTrieError> {
        tracing::info!(from = ?self.store.tip_height(), to = ?snapshot.tip.as_ref().map(|t| t.height), "Restoring claim trie");
        self.store.restore_snapshot(snapshot)?;
        self.state = ProcessorState::Idle;
        Ok(())
    }

    /// Claim id controlling `name` as of the tip.
    pub fn resolve(&self, name: &ClaimName) -> Option<String> {
        let name = self.params.normalization.apply(name);
        self.store.name_state(&name).controller.map(|h| h.claim_id())
    }

    /// Claims competing for `name`, in tie-break order.
    pub fn get_claims_for_name(&self, name: &ClaimName) -> Vec<ClaimRecord> {
        let name = self.params.normalization.apply(name);
        let mut claims = self.store.get_claims_for_name(&name);
        claims.sort_by_key(|c| c.root);
        claims
    }

    pub fn get_claim(&self, claim_hash: &ClaimHash) -> Option<ClaimRecord> {
        self.store.get_claim_by_hash(claim_hash)
    }

    /// Effective amount of a claim as of the tip.
    pub fn effective_amount(&self, claim_hash: &ClaimHash) -> Option<u64> {
        let height = self.store.tip_height()?;
        let claim = self.store.get_claim_by_hash(claim_hash)?;
        Some(TakeoverResolver::effective_amount(&self.store, &claim, height))
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn tip(&self) -> Option<BlockSummary> {
        self.store.tip()
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ─── Phases ──────────────────────────────────────────────────────────────

    fn apply_block(&mut self, block: &Block) -> Result<ChangeSet, ClaimTrieError> {
        let height = block.height;

        self.state = ProcessorState::Extracting;
        let extraction = self.extractor.extract(block, &self.store);

        self.state = ProcessorState::Mutating;
        let mut touched: BTreeSet<ClaimName> = BTreeSet::new();
        for event in &extraction.events {
            self.apply_event(height, event, &mut touched)?;
        }
        self.expire(height, &mut touched)?;

        self.state = ProcessorState::Resolving;
        touched.extend(self.store.names_activating_at(height));

        let mut change_set = ChangeSet {
            height,
            block_hash: block.hash.clone(),
            changed_names: vec![],
            newly_activated: vec![],
            takeovers: vec![],
        };
        let mut activated: BTreeSet<String> = BTreeSet::new();
        for name in &touched {
            let outcome = TakeoverResolver::resolve_name(&mut self.store, name, height)?;
            if outcome.changed() {
                change_set.changed_names.push(NameChange {
                    name: name.clone(),
                    new_controller: outcome.controller.map(|h| h.claim_id()),
                    previous_controller: outcome.previous.map(|h| h.claim_id()),
                });
            }
            change_set.takeovers.extend(outcome.takeover);
            activated.extend(
                self.store
                    .get_claims_for_name(name)
                    .into_iter()
                    .filter(|c| c.activation_height == height)
                    .map(|c| c.claim_id()),
            );
        }
        change_set.newly_activated = activated.into_iter().collect();

        self.store.checkpoint(&block.summary())?;
        tracing::debug!(
            height,
            events = extraction.events.len(),
            skipped = extraction.skipped.len(),
            names = touched.len(),
            takeovers = change_set.takeovers.len(),
            "Block committed"
        );
        Ok(change_set)
    }

    fn apply_event(
        &mut self,
        height: u32,
        event: &ClaimEvent,
        touched: &mut BTreeSet<ClaimName>,
    ) -> Result<(), ClaimTrieError> {
        let scheduler = ActivationScheduler::new(&self.params);
        match event {
            ClaimEvent::ClaimCreated { name, raw_name, claim_hash, amount, txo, position } => {
                let state = self.store.name_state(name);
                let activation_height =
                    scheduler.schedule_activation(&state, ActivationSubject::Claim(*claim_hash), height);
                tracing::debug!(%name, claim_id = %claim_hash, amount, activation_height, "Claim created");
                self.store.upsert_claim(ClaimRecord {
                    claim_hash: *claim_hash,
                    name: name.clone(),
                    raw_name: raw_name.clone(),
                    txo: *txo,
                    amount: *amount,
                    root: *position,
                    height,
                    activation_height,
                    expiration_height: self.params.expiration_height(height),
                })?;
                touched.insert(name.clone());
            }
            ClaimEvent::ClaimUpdated { claim_hash, prev_txo, new_txo, new_amount, raw_name, .. } => {
                let existing = self.store.get_claim_by_hash(claim_hash).ok_or_else(|| {
                    ClaimTrieError::MissingClaim { height, claim_id: claim_hash.claim_id() }
                })?;
                if existing.txo != *prev_txo {
                    return Err(ClaimTrieError::InconsistentSpend { height, txo: prev_txo.to_string() });
                }
                let state = self.store.name_state(&existing.name);
                let activation_height =
                    scheduler.schedule_activation(&state, ActivationSubject::Claim(*claim_hash), height);
                tracing::debug!(name = %existing.name, claim_id = %claim_hash, amount = new_amount, activation_height, "Claim updated");
                touched.insert(existing.name.clone());
                self.store.upsert_claim(ClaimRecord {
                    raw_name: raw_name.clone(),
                    txo: *new_txo,
                    amount: *new_amount,
                    height,
                    activation_height,
                    expiration_height: self.params.expiration_height(height),
                    ..existing
                })?;
            }
            ClaimEvent::SupportAdded { claim_hash, amount, txo, .. } => {
                let claim = self.store.get_claim_by_hash(claim_hash).ok_or_else(|| {
                    ClaimTrieError::MissingClaim { height, claim_id: claim_hash.claim_id() }
                })?;
                let state = self.store.name_state(&claim.name);
                let activation_height = scheduler.schedule_activation(
                    &state,
                    ActivationSubject::Support { target: *claim_hash },
                    height,
                );
                tracing::debug!(name = %claim.name, claim_id = %claim_hash, amount, activation_height, "Support added");
                touched.insert(claim.name.clone());
                self.store.upsert_support(SupportRecord {
                    txo: *txo,
                    claim_hash: *claim_hash,
                    name: claim.name,
                    amount: *amount,
                    height,
                    activation_height,
                    expiration_height: self.params.expiration_height(height),
                })?;
            }
            ClaimEvent::Spent { txo, .. } => match self.store.remove_by_txo(txo)? {
                Some(Removed::Claim(claim, supports)) => {
                    tracing::debug!(name = %claim.name, claim_id = %claim.claim_hash, dropped_supports = supports.len(), "Claim abandoned");
                    touched.insert(claim.name);
                }
                Some(Removed::Support(support)) => {
                    tracing::debug!(name = %support.name, claim_id = %support.claim_hash, amount = support.amount, "Support abandoned");
                    touched.insert(support.name);
                }
                None => {
                    return Err(ClaimTrieError::InconsistentSpend { height, txo: txo.to_string() });
                }
            },
        }
        Ok(())
    }

    fn expire(&mut self, height: u32, touched: &mut BTreeSet<ClaimName>) -> Result<(), ClaimTrieError> {
        let expiring = self.store.expiring_at(height);
        for claim_hash in &expiring.claims {
            if let Some(Removed::Claim(claim, _)) = self.store.remove_claim(claim_hash)? {
                tracing::debug!(name = %claim.name, claim_id = %claim_hash, height, "Claim expired");
                touched.insert(claim.name);
            }
        }
        for txo in &expiring.supports {
            if let Some(Removed::Support(support)) = self.store.remove_by_txo(txo)? {
                touched.insert(support.name);
            }
        }
        Ok(())
    }
}
