//! Claim trie store: the only owner of claim, support and name records.
//!
//! Every mutation made while a block is being processed is recorded as an
//! inverse operation. [`ClaimTrieStore::checkpoint`] seals those operations
//! under the block's height; [`ClaimTrieStore::rollback_to`] replays them in
//! reverse. A block that fails half-way is undone with
//! [`ClaimTrieStore::revert_pending`], so nothing partial is ever committed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};

use crate::error::ClaimTrieError;
use crate::types::{BlockSummary, ClaimHash, ClaimName, ClaimRecord, NameState, SupportRecord, Takeover};

/// What a spent output turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removed {
    /// A claim, together with the supports that were dropped with it.
    Claim(ClaimRecord, Vec<SupportRecord>),
    Support(SupportRecord),
}

/// Claims and supports whose expiration height is reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expiring {
    pub claims: Vec<ClaimHash>,
    pub supports: Vec<OutPoint>,
}

/// Read/write contract of the claim trie.
///
/// Implementations must make every mutation revertible until the block is
/// checkpointed, and every checkpointed block revertible until it falls out
/// of the retained undo depth.
pub trait ClaimTrieStore: Send {
    /// Last committed block.
    fn tip(&self) -> Option<BlockSummary>;

    fn tip_height(&self) -> Option<u32> {
        self.tip().map(|b| b.height)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Live (non-abandoned, non-expired) claims for a normalized name.
    fn get_claims_for_name(&self, name: &ClaimName) -> Vec<ClaimRecord>;
    fn get_claim_by_hash(&self, claim_hash: &ClaimHash) -> Option<ClaimRecord>;
    fn get_claim_by_txo(&self, txo: &OutPoint) -> Option<ClaimRecord>;
    fn get_support_by_txo(&self, txo: &OutPoint) -> Option<SupportRecord>;
    fn get_supports_for_claim(&self, claim_hash: &ClaimHash) -> Vec<SupportRecord>;
    fn name_state(&self, name: &ClaimName) -> NameState;
    /// All names with at least one claim or a recorded controller.
    fn names(&self) -> Vec<ClaimName>;
    fn takeovers_for_name(&self, name: &ClaimName) -> Vec<Takeover>;
    fn expiring_at(&self, height: u32) -> Expiring;
    /// Names with a claim or support whose activation height is exactly `height`.
    fn names_activating_at(&self, height: u32) -> Vec<ClaimName>;

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Insert a claim, or replace the current version of an existing claim.
    fn upsert_claim(&mut self, claim: ClaimRecord) -> Result<(), ClaimTrieError>;
    fn upsert_support(&mut self, support: SupportRecord) -> Result<(), ClaimTrieError>;
    /// Remove whatever claim or support lives at `txo`. Removing a claim
    /// drops its supports. Returns `None` if `txo` is not tracked.
    fn remove_by_txo(&mut self, txo: &OutPoint) -> Result<Option<Removed>, ClaimTrieError>;
    /// Remove a claim and its supports.
    fn remove_claim(&mut self, claim_hash: &ClaimHash) -> Result<Option<Removed>, ClaimTrieError>;
    fn set_activation_height(&mut self, claim_hash: &ClaimHash, height: u32) -> Result<(), ClaimTrieError>;
    fn set_support_activation_height(&mut self, txo: &OutPoint, height: u32) -> Result<(), ClaimTrieError>;
    /// Make `claim_hash` the controller of `name` and append to the takeover log.
    fn record_takeover(&mut self, name: &ClaimName, height: u32, claim_hash: ClaimHash) -> Result<(), ClaimTrieError>;
    /// Forget the controller of `name` (no claim left to control it).
    fn clear_controller(&mut self, name: &ClaimName) -> Result<(), ClaimTrieError>;

    // ── Block boundaries ─────────────────────────────────────────────────────

    /// Seal all mutations since the previous checkpoint under `block`.
    fn checkpoint(&mut self, block: &BlockSummary) -> Result<(), ClaimTrieError>;
    /// Undo mutations that have not been checkpointed yet.
    fn revert_pending(&mut self) -> Result<(), ClaimTrieError>;
    /// Restore the state as of the end of block `height`.
    fn rollback_to(&mut self, height: u32) -> Result<(), ClaimTrieError>;

    // ── Snapshots ────────────────────────────────────────────────────────────

    /// Committed state for a checkpoint. `None` if the store persists itself.
    fn export_snapshot(&self) -> Option<TrieSnapshot> {
        None
    }

    /// Replace the whole contents with `snapshot`.
    fn restore_snapshot(&mut self, _snapshot: TrieSnapshot) -> Result<(), ClaimTrieError> {
        Err(ClaimTrieError::InvalidState("store cannot be restored from a snapshot".into()))
    }
}

// ─── In-memory implementation ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct NameEntry {
    claims: BTreeSet<ClaimHash>,
    state: NameState,
}

#[derive(Debug, Clone)]
enum UndoOp {
    RestoreClaim(ClaimRecord),
    DeleteClaim(ClaimHash),
    RestoreSupport(SupportRecord),
    DeleteSupport(OutPoint),
    RestoreName(ClaimName, NameState),
    PopTakeover,
}

#[derive(Debug, Clone)]
struct JournalEntry {
    block: BlockSummary,
    prev_tip: Option<BlockSummary>,
    undo: Vec<UndoOp>,
}

/// Serializable view of the trie contents, in deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieSnapshot {
    pub tip: Option<BlockSummary>,
    pub claims: Vec<ClaimRecord>,
    pub supports: Vec<SupportRecord>,
    pub names: Vec<(ClaimName, NameState)>,
    pub takeovers: Vec<Takeover>,
}

/// `BTreeMap`-backed store with a bounded undo journal.
#[derive(Debug)]
pub struct MemoryClaimTrieStore {
    claims: BTreeMap<ClaimHash, ClaimRecord>,
    claims_by_txo: BTreeMap<OutPoint, ClaimHash>,
    supports: BTreeMap<OutPoint, SupportRecord>,
    supports_by_claim: BTreeMap<ClaimHash, BTreeSet<OutPoint>>,
    names: BTreeMap<ClaimName, NameEntry>,
    takeovers: Vec<Takeover>,
    activations: BTreeMap<u32, BTreeSet<(ClaimName, OutPoint)>>,
    expirations: BTreeMap<u32, BTreeSet<OutPoint>>,
    tip: Option<BlockSummary>,
    pending: Vec<UndoOp>,
    journal: VecDeque<JournalEntry>,
    undo_depth: usize,
}

impl MemoryClaimTrieStore {
    pub fn new(undo_depth: u32) -> Self {
        Self {
            claims: BTreeMap::new(),
            claims_by_txo: BTreeMap::new(),
            supports: BTreeMap::new(),
            supports_by_claim: BTreeMap::new(),
            names: BTreeMap::new(),
            takeovers: Vec::new(),
            activations: BTreeMap::new(),
            expirations: BTreeMap::new(),
            tip: None,
            pending: Vec::new(),
            journal: VecDeque::new(),
            undo_depth: undo_depth.max(1) as usize,
        }
    }

    pub fn snapshot(&self) -> TrieSnapshot {
        TrieSnapshot {
            tip: self.tip.clone(),
            claims: self.claims.values().cloned().collect(),
            supports: self.supports.values().cloned().collect(),
            names: self.names.iter().map(|(n, e)| (n.clone(), e.state)).collect(),
            takeovers: self.takeovers.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, ClaimTrieError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Rebuild a store from a snapshot. The undo journal starts empty, so the
    /// snapshot's tip is the oldest height `rollback_to` can reach.
    pub fn from_snapshot(snapshot: TrieSnapshot, undo_depth: u32) -> Result<Self, ClaimTrieError> {
        let mut store = Self::new(undo_depth);
        for claim in snapshot.claims {
            if store.claims.contains_key(&claim.claim_hash) || store.claims_by_txo.contains_key(&claim.txo) {
                return Err(ClaimTrieError::InvalidState(format!(
                    "snapshot holds claim {} or output {} twice",
                    claim.claim_hash, claim.txo
                )));
            }
            store.insert_claim_raw(claim);
        }
        for support in snapshot.supports {
            if !store.claims.contains_key(&support.claim_hash) {
                return Err(ClaimTrieError::InvalidState(format!(
                    "snapshot support {} backs unknown claim {}",
                    support.txo, support.claim_hash
                )));
            }
            store.insert_support_raw(support);
        }
        for (name, state) in snapshot.names {
            store.set_name_state_raw(&name, state);
        }
        store.takeovers = snapshot.takeovers;
        store.tip = snapshot.tip;
        Ok(store)
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn support_count(&self) -> usize {
        self.supports.len()
    }

    /// Oldest height `rollback_to` can reach; `None` if the journal reaches
    /// back to the empty store.
    fn oldest_reachable(&self) -> Option<u32> {
        match self.journal.front() {
            Some(entry) => entry.prev_tip.as_ref().map(|b| b.height),
            None => self.tip.as_ref().map(|b| b.height),
        }
    }

    // ── Raw mutations (no journaling) ────────────────────────────────────────

    fn insert_claim_raw(&mut self, claim: ClaimRecord) {
        self.claims_by_txo.insert(claim.txo, claim.claim_hash);
        self.activations
            .entry(claim.activation_height)
            .or_default()
            .insert((claim.name.clone(), claim.txo));
        self.expirations
            .entry(claim.expiration_height)
            .or_default()
            .insert(claim.txo);
        self.names
            .entry(claim.name.clone())
            .or_default()
            .claims
            .insert(claim.claim_hash);
        self.claims.insert(claim.claim_hash, claim);
    }

    fn delete_claim_raw(&mut self, claim_hash: &ClaimHash) -> Option<ClaimRecord> {
        let claim = self.claims.remove(claim_hash)?;
        self.claims_by_txo.remove(&claim.txo);
        remove_indexed(&mut self.activations, claim.activation_height, &(claim.name.clone(), claim.txo));
        remove_indexed(&mut self.expirations, claim.expiration_height, &claim.txo);
        if let Some(entry) = self.names.get_mut(&claim.name) {
            entry.claims.remove(claim_hash);
        }
        self.prune_name(&claim.name);
        Some(claim)
    }

    fn insert_support_raw(&mut self, support: SupportRecord) {
        self.activations
            .entry(support.activation_height)
            .or_default()
            .insert((support.name.clone(), support.txo));
        self.expirations
            .entry(support.expiration_height)
            .or_default()
            .insert(support.txo);
        self.supports_by_claim
            .entry(support.claim_hash)
            .or_default()
            .insert(support.txo);
        self.supports.insert(support.txo, support);
    }

    fn delete_support_raw(&mut self, txo: &OutPoint) -> Option<SupportRecord> {
        let support = self.supports.remove(txo)?;
        remove_indexed(&mut self.activations, support.activation_height, &(support.name.clone(), support.txo));
        remove_indexed(&mut self.expirations, support.expiration_height, &support.txo);
        remove_indexed(&mut self.supports_by_claim, support.claim_hash, txo);
        Some(support)
    }

    fn set_name_state_raw(&mut self, name: &ClaimName, state: NameState) {
        self.names.entry(name.clone()).or_default().state = state;
        self.prune_name(name);
    }

    fn prune_name(&mut self, name: &ClaimName) {
        let empty = self
            .names
            .get(name)
            .map(|e| e.claims.is_empty() && e.state == NameState::default())
            .unwrap_or(false);
        if empty {
            self.names.remove(name);
        }
    }

    fn undo(&mut self, op: UndoOp) {
        match op {
            UndoOp::RestoreClaim(claim) => {
                self.delete_claim_raw(&claim.claim_hash);
                self.insert_claim_raw(claim);
            }
            UndoOp::DeleteClaim(claim_hash) => {
                self.delete_claim_raw(&claim_hash);
            }
            UndoOp::RestoreSupport(support) => {
                self.delete_support_raw(&support.txo);
                self.insert_support_raw(support);
            }
            UndoOp::DeleteSupport(txo) => {
                self.delete_support_raw(&txo);
            }
            UndoOp::RestoreName(name, state) => self.set_name_state_raw(&name, state),
            UndoOp::PopTakeover => {
                self.takeovers.pop();
            }
        }
    }

    fn undo_all(&mut self, ops: Vec<UndoOp>) {
        for op in ops.into_iter().rev() {
            self.undo(op);
        }
    }

    fn remove_claim_journaled(&mut self, claim_hash: &ClaimHash) -> Option<Removed> {
        let txos: Vec<OutPoint> = self
            .supports_by_claim
            .get(claim_hash)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let mut dropped = Vec::with_capacity(txos.len());
        for txo in txos {
            if let Some(support) = self.delete_support_raw(&txo) {
                self.pending.push(UndoOp::RestoreSupport(support.clone()));
                dropped.push(support);
            }
        }
        let claim = self.delete_claim_raw(claim_hash)?;
        self.pending.push(UndoOp::RestoreClaim(claim.clone()));
        Some(Removed::Claim(claim, dropped))
    }
}

impl Default for MemoryClaimTrieStore {
    fn default() -> Self {
        Self::new(crate::params::DEFAULT_UNDO_DEPTH)
    }
}

fn remove_indexed<K: Ord + Copy, V: Ord>(index: &mut BTreeMap<K, BTreeSet<V>>, key: K, value: &V) {
    if let Some(set) = index.get_mut(&key) {
        set.remove(value);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}

impl ClaimTrieStore for MemoryClaimTrieStore {
    fn tip(&self) -> Option<BlockSummary> {
        self.tip.clone()
    }

    fn get_claims_for_name(&self, name: &ClaimName) -> Vec<ClaimRecord> {
        self.names
            .get(name)
            .map(|entry| {
                entry
                    .claims
                    .iter()
                    .filter_map(|h| self.claims.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn get_claim_by_hash(&self, claim_hash: &ClaimHash) -> Option<ClaimRecord> {
        self.claims.get(claim_hash).cloned()
    }

    fn get_claim_by_txo(&self, txo: &OutPoint) -> Option<ClaimRecord> {
        self.claims_by_txo
            .get(txo)
            .and_then(|h| self.claims.get(h))
            .cloned()
    }

    fn get_support_by_txo(&self, txo: &OutPoint) -> Option<SupportRecord> {
        self.supports.get(txo).cloned()
    }

    fn get_supports_for_claim(&self, claim_hash: &ClaimHash) -> Vec<SupportRecord> {
        self.supports_by_claim
            .get(claim_hash)
            .map(|txos| txos.iter().filter_map(|t| self.supports.get(t).cloned()).collect())
            .unwrap_or_default()
    }

    fn name_state(&self, name: &ClaimName) -> NameState {
        self.names.get(name).map(|e| e.state).unwrap_or_default()
    }

    fn names(&self) -> Vec<ClaimName> {
        self.names.keys().cloned().collect()
    }

    fn takeovers_for_name(&self, name: &ClaimName) -> Vec<Takeover> {
        self.takeovers.iter().filter(|t| &t.name == name).cloned().collect()
    }

    fn expiring_at(&self, height: u32) -> Expiring {
        let mut expiring = Expiring::default();
        for txo in self.expirations.get(&height).into_iter().flatten() {
            if let Some(claim_hash) = self.claims_by_txo.get(txo) {
                expiring.claims.push(*claim_hash);
            } else if self.supports.contains_key(txo) {
                expiring.supports.push(*txo);
            }
        }
        expiring
    }

    fn names_activating_at(&self, height: u32) -> Vec<ClaimName> {
        let names: BTreeSet<ClaimName> = self
            .activations
            .get(&height)
            .into_iter()
            .flatten()
            .map(|(name, _)| name.clone())
            .collect();
        names.into_iter().collect()
    }

    fn upsert_claim(&mut self, claim: ClaimRecord) -> Result<(), ClaimTrieError> {
        if let Some(existing) = self.claims.get(&claim.claim_hash) {
            if existing.name != claim.name {
                return Err(ClaimTrieError::InvalidState(format!(
                    "claim {} cannot move from name '{}' to '{}'",
                    claim.claim_hash, existing.name, claim.name
                )));
            }
        }
        if let Some(owner) = self.claims_by_txo.get(&claim.txo) {
            if *owner != claim.claim_hash {
                return Err(ClaimTrieError::Storage(format!(
                    "output {} already holds claim {owner}",
                    claim.txo
                )));
            }
        }
        match self.delete_claim_raw(&claim.claim_hash) {
            Some(previous) => self.pending.push(UndoOp::RestoreClaim(previous)),
            None => self.pending.push(UndoOp::DeleteClaim(claim.claim_hash)),
        }
        self.insert_claim_raw(claim);
        Ok(())
    }

    fn upsert_support(&mut self, support: SupportRecord) -> Result<(), ClaimTrieError> {
        if self.claims_by_txo.contains_key(&support.txo) {
            return Err(ClaimTrieError::Storage(format!(
                "output {} already holds a claim",
                support.txo
            )));
        }
        match self.delete_support_raw(&support.txo) {
            Some(previous) => self.pending.push(UndoOp::RestoreSupport(previous)),
            None => self.pending.push(UndoOp::DeleteSupport(support.txo)),
        }
        self.insert_support_raw(support);
        Ok(())
    }

    fn remove_by_txo(&mut self, txo: &OutPoint) -> Result<Option<Removed>, ClaimTrieError> {
        if let Some(claim_hash) = self.claims_by_txo.get(txo).copied() {
            return Ok(self.remove_claim_journaled(&claim_hash));
        }
        match self.delete_support_raw(txo) {
            Some(support) => {
                self.pending.push(UndoOp::RestoreSupport(support.clone()));
                Ok(Some(Removed::Support(support)))
            }
            None => Ok(None),
        }
    }

    fn remove_claim(&mut self, claim_hash: &ClaimHash) -> Result<Option<Removed>, ClaimTrieError> {
        Ok(self.remove_claim_journaled(claim_hash))
    }

    fn set_activation_height(&mut self, claim_hash: &ClaimHash, height: u32) -> Result<(), ClaimTrieError> {
        let mut claim = self.claims.get(claim_hash).cloned().ok_or_else(|| {
            ClaimTrieError::Storage(format!("no claim {claim_hash} to activate"))
        })?;
        claim.activation_height = height;
        self.upsert_claim(claim)
    }

    fn set_support_activation_height(&mut self, txo: &OutPoint, height: u32) -> Result<(), ClaimTrieError> {
        let mut support = self
            .supports
            .get(txo)
            .cloned()
            .ok_or_else(|| ClaimTrieError::Storage(format!("no support at {txo} to activate")))?;
        support.activation_height = height;
        self.upsert_support(support)
    }

    fn record_takeover(&mut self, name: &ClaimName, height: u32, claim_hash: ClaimHash) -> Result<(), ClaimTrieError> {
        let previous = self.name_state(name);
        self.pending.push(UndoOp::RestoreName(name.clone(), previous));
        self.set_name_state_raw(
            name,
            NameState {
                controller: Some(claim_hash),
                last_takeover_height: height,
            },
        );
        self.pending.push(UndoOp::PopTakeover);
        self.takeovers.push(Takeover {
            name: name.clone(),
            height,
            claim_hash,
        });
        Ok(())
    }

    fn clear_controller(&mut self, name: &ClaimName) -> Result<(), ClaimTrieError> {
        let previous = self.name_state(name);
        self.pending.push(UndoOp::RestoreName(name.clone(), previous));
        self.set_name_state_raw(name, NameState::default());
        Ok(())
    }

    fn checkpoint(&mut self, block: &BlockSummary) -> Result<(), ClaimTrieError> {
        if let Some(tip) = &self.tip {
            if block.height != tip.height + 1 {
                return Err(ClaimTrieError::InvalidState(format!(
                    "checkpoint at {} does not follow tip {}",
                    block.height, tip.height
                )));
            }
        }
        let undo = std::mem::take(&mut self.pending);
        let prev_tip = self.tip.replace(block.clone());
        self.journal.push_back(JournalEntry {
            block: block.clone(),
            prev_tip,
            undo,
        });
        while self.journal.len() > self.undo_depth {
            self.journal.pop_front();
        }
        Ok(())
    }

    fn revert_pending(&mut self) -> Result<(), ClaimTrieError> {
        let pending = std::mem::take(&mut self.pending);
        self.undo_all(pending);
        Ok(())
    }

    fn rollback_to(&mut self, height: u32) -> Result<(), ClaimTrieError> {
        self.revert_pending()?;
        if let Some(oldest) = self.oldest_reachable() {
            if height < oldest {
                return Err(ClaimTrieError::RollbackTooDeep { target: height, oldest });
            }
        }
        while self.tip.as_ref().map(|t| t.height > height).unwrap_or(false) {
            let entry = self.journal.pop_back().ok_or_else(|| {
                ClaimTrieError::InvalidState("undo journal exhausted".into())
            })?;
            tracing::debug!(height = entry.block.height, ops = entry.undo.len(), "Undoing block");
            self.undo_all(entry.undo);
            self.tip = entry.prev_tip;
        }
        Ok(())
    }

    fn export_snapshot(&self) -> Option<TrieSnapshot> {
        Some(self.snapshot())
    }

    fn restore_snapshot(&mut self, snapshot: TrieSnapshot) -> Result<(), ClaimTrieError> {
        *self = Self::from_snapshot(snapshot, self.undo_depth as u32)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxPosition;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn txo(n: u8) -> OutPoint {
        OutPoint { txid: Txid::from_byte_array([n; 32]), vout: 0 }
    }

    fn claim(n: u8, name: &str, amount: u64, height: u32) -> ClaimRecord {
        let txo = txo(n);
        ClaimRecord {
            claim_hash: ClaimHash::from_outpoint(&txo),
            name: name.into(),
            raw_name: name.into(),
            txo,
            amount,
            root: TxPosition { height, tx_index: 0, output_index: 0 },
            height,
            activation_height: height,
            expiration_height: height + 100,
        }
    }

    fn support(n: u8, target: &ClaimRecord, amount: u64, height: u32) -> SupportRecord {
        SupportRecord {
            txo: txo(n),
            claim_hash: target.claim_hash,
            name: target.name.clone(),
            amount,
            height,
            activation_height: height,
            expiration_height: height + 100,
        }
    }

    fn block(height: u32) -> BlockSummary {
        BlockSummary {
            height,
            hash: format!("h{height}"),
            prev_hash: format!("h{}", height.wrapping_sub(1)),
        }
    }

    #[test]
    fn upsert_and_lookup() {
        let mut store = MemoryClaimTrieStore::default();
        let a = claim(1, "foo", 10, 1);
        store.upsert_claim(a.clone()).unwrap();
        assert_eq!(store.get_claims_for_name(&"foo".into()), vec![a.clone()]);
        assert_eq!(store.get_claim_by_txo(&a.txo), Some(a.clone()));
        assert_eq!(store.get_claim_by_hash(&a.claim_hash), Some(a));
        assert!(store.get_claims_for_name(&"bar".into()).is_empty());
    }

    #[test]
    fn removing_claim_drops_supports() {
        let mut store = MemoryClaimTrieStore::default();
        let a = claim(1, "foo", 10, 1);
        store.upsert_claim(a.clone()).unwrap();
        store.upsert_support(support(2, &a, 5, 1)).unwrap();
        assert_eq!(store.get_supports_for_claim(&a.claim_hash).len(), 1);

        match store.remove_by_txo(&a.txo).unwrap() {
            Some(Removed::Claim(removed, supports)) => {
                assert_eq!(removed, a);
                assert_eq!(supports.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.support_count(), 0);
        assert!(store.names().is_empty());
        assert!(store.remove_by_txo(&a.txo).unwrap().is_none());
    }

    #[test]
    fn revert_pending_restores_state() {
        let mut store = MemoryClaimTrieStore::default();
        let a = claim(1, "foo", 10, 1);
        store.upsert_claim(a.clone()).unwrap();
        store.checkpoint(&block(1)).unwrap();
        let before = store.snapshot();

        store.upsert_claim(claim(2, "foo", 20, 2)).unwrap();
        store.set_activation_height(&a.claim_hash, 7).unwrap();
        store.record_takeover(&"foo".into(), 2, a.claim_hash).unwrap();
        store.remove_by_txo(&a.txo).unwrap();
        store.revert_pending().unwrap();

        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn rollback_across_checkpoints() {
        let mut store = MemoryClaimTrieStore::default();
        let a = claim(1, "foo", 10, 1);
        store.upsert_claim(a.clone()).unwrap();
        store.record_takeover(&"foo".into(), 1, a.claim_hash).unwrap();
        store.checkpoint(&block(1)).unwrap();
        let at_one = store.to_json().unwrap();

        store.upsert_support(support(2, &a, 5, 2)).unwrap();
        store.checkpoint(&block(2)).unwrap();
        store.remove_by_txo(&a.txo).unwrap();
        store.clear_controller(&"foo".into()).unwrap();
        store.checkpoint(&block(3)).unwrap();

        store.rollback_to(1).unwrap();
        assert_eq!(store.tip_height(), Some(1));
        assert_eq!(store.to_json().unwrap(), at_one);
    }

    #[test]
    fn rollback_beyond_undo_depth_fails() {
        let mut store = MemoryClaimTrieStore::new(2);
        for h in 1..=5 {
            store.upsert_claim(claim(h as u8, "foo", 1, h)).unwrap();
            store.checkpoint(&block(h)).unwrap();
        }
        let err = store.rollback_to(1).unwrap_err();
        assert!(matches!(err, ClaimTrieError::RollbackTooDeep { target: 1, oldest: 3 }));
        assert_eq!(store.tip_height(), Some(5));
        store.rollback_to(3).unwrap();
        assert_eq!(store.claim_count(), 3);
    }

    #[test]
    fn activation_and_expiration_indexes() {
        let mut store = MemoryClaimTrieStore::default();
        let mut a = claim(1, "foo", 10, 1);
        a.activation_height = 40;
        store.upsert_claim(a.clone()).unwrap();
        let b = claim(2, "bar", 10, 1);
        store.upsert_claim(b.clone()).unwrap();
        let mut s = support(3, &b, 1, 1);
        s.activation_height = 40;
        store.upsert_support(s).unwrap();

        assert_eq!(
            store.names_activating_at(40),
            vec![ClaimName::from("bar"), ClaimName::from("foo")]
        );
        store.set_activation_height(&a.claim_hash, 5).unwrap();
        assert_eq!(store.names_activating_at(40), vec![ClaimName::from("bar")]);

        let expiring = store.expiring_at(101);
        assert_eq!(expiring.claims.len(), 2);
        assert_eq!(expiring.supports, vec![txo(3)]);
    }

    #[test]
    fn takeover_log_per_name() {
        let mut store = MemoryClaimTrieStore::default();
        let a = claim(1, "foo", 10, 1);
        store.upsert_claim(a.clone()).unwrap();
        store.record_takeover(&"foo".into(), 1, a.claim_hash).unwrap();
        assert_eq!(
            store.name_state(&"foo".into()),
            NameState { controller: Some(a.claim_hash), last_takeover_height: 1 }
        );
        assert_eq!(store.takeovers_for_name(&"foo".into()).len(), 1);
        assert!(store.takeovers_for_name(&"bar".into()).is_empty());
    }

    #[test]
    fn restored_store_matches_and_keeps_indexes() {
        let mut store = MemoryClaimTrieStore::default();
        let a = claim(1, "foo", 10, 1);
        let mut b = claim(2, "foo", 20, 2);
        b.activation_height = 9;
        store.upsert_claim(a.clone()).unwrap();
        store.record_takeover(&"foo".into(), 1, a.claim_hash).unwrap();
        store.checkpoint(&block(1)).unwrap();
        store.upsert_claim(b.clone()).unwrap();
        store.upsert_support(support(3, &a, 5, 2)).unwrap();
        store.checkpoint(&block(2)).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let snapshot: TrieSnapshot = serde_json::from_str(&json).unwrap();
        let mut restored = MemoryClaimTrieStore::from_snapshot(snapshot, 10).unwrap();

        assert_eq!(restored.to_json().unwrap(), store.to_json().unwrap());
        assert_eq!(restored.get_claim_by_txo(&b.txo), Some(b.clone()));
        assert_eq!(restored.get_supports_for_claim(&a.claim_hash).len(), 1);
        assert_eq!(restored.names_activating_at(9), vec![ClaimName::from("foo")]);
        assert_eq!(restored.expiring_at(102).claims, vec![b.claim_hash]);

        // History before the snapshot is gone; new blocks journal as usual.
        let err = restored.rollback_to(1).unwrap_err();
        assert!(matches!(err, ClaimTrieError::RollbackTooDeep { target: 1, oldest: 2 }));
        restored.remove_by_txo(&b.txo).unwrap();
        restored.checkpoint(&block(3)).unwrap();
        restored.rollback_to(2).unwrap();
        assert_eq!(restored.to_json().unwrap(), store.to_json().unwrap());
    }

    #[test]
    fn snapshot_with_orphan_support_is_rejected() {
        let a = claim(1, "foo", 10, 1);
        let snapshot = TrieSnapshot {
            tip: Some(block(1)),
            claims: vec![],
            supports: vec![support(2, &a, 5, 1)],
            names: vec![],
            takeovers: vec![],
        };
        let err = MemoryClaimTrieStore::from_snapshot(snapshot, 10).unwrap_err();
        assert!(matches!(err, ClaimTrieError::InvalidState(_)));
    }
}
