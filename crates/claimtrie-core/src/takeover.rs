//! Takeover resolution: picks the controlling claim of a name and records
//! controller changes.

use std::cmp::Reverse;

use crate::error::ClaimTrieError;
use crate::store::ClaimTrieStore;
use crate::types::{ClaimHash, ClaimName, ClaimRecord, Takeover};

/// Result of resolving one name at one height.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameOutcome {
    pub previous: Option<ClaimHash>,
    pub controller: Option<ClaimHash>,
    /// Claims whose pending activation was pulled forward by a takeover.
    pub early_activated: Vec<ClaimHash>,
    pub takeover: Option<Takeover>,
}

impl NameOutcome {
    pub fn changed(&self) -> bool {
        self.previous != self.controller
    }
}

pub struct TakeoverResolver;

impl TakeoverResolver {
    /// `amount` plus every support of the claim active at `height`.
    pub fn effective_amount<S: ClaimTrieStore + ?Sized>(store: &S, claim: &ClaimRecord, height: u32) -> u64 {
        store
            .get_supports_for_claim(&claim.claim_hash)
            .iter()
            .filter(|s| s.is_active_at(height))
            .fold(claim.amount, |acc, s| acc.saturating_add(s.amount))
    }

    /// Order candidates best first: highest effective amount, then earliest
    /// original position.
    pub fn rank(candidates: &mut [(ClaimRecord, u64)]) {
        candidates.sort_by_key(|(claim, effective)| (Reverse(*effective), claim.root));
    }

    /// Controlling claim of `name` at `height`, without touching the store.
    pub fn resolve_controller<S: ClaimTrieStore + ?Sized>(store: &S, name: &ClaimName, height: u32) -> Option<ClaimHash> {
        let mut candidates: Vec<(ClaimRecord, u64)> = store
            .get_claims_for_name(name)
            .into_iter()
            .filter(|c| c.is_active_at(height))
            .map(|c| {
                let effective = Self::effective_amount(store, &c, height);
                (c, effective)
            })
            .collect();
        Self::rank(&mut candidates);
        candidates.first().map(|(c, _)| c.claim_hash)
    }

    /// Resolve `name` at `height` and write the outcome to the store.
    ///
    /// If the best active claim is not the recorded controller, every pending
    /// claim and support of the name is activated at `height` and the winner
    /// is picked again. A takeover is recorded only if the controller
    /// actually changes.
    ///
    /// Early activation lowers `activation_height` to `height`, so activation
    /// heights are not monotonic across a takeover.
    pub fn resolve_name<S: ClaimTrieStore + ?Sized>(
        store: &mut S,
        name: &ClaimName,
        height: u32,
    ) -> Result<NameOutcome, ClaimTrieError> {
        let previous = store.name_state(name).controller;
        let mut best = Self::resolve_controller(&*store, name, height);
        let mut early_activated = Vec::new();

        if best != previous {
            for claim in store.get_claims_for_name(name) {
                for support in store.get_supports_for_claim(&claim.claim_hash) {
                    if !support.is_active_at(height) {
                        store.set_support_activation_height(&support.txo, height)?;
                    }
                }
                if !claim.is_active_at(height) {
                    store.set_activation_height(&claim.claim_hash, height)?;
                    early_activated.push(claim.claim_hash);
                }
            }
            if !early_activated.is_empty() {
                tracing::debug!(%name, height, count = early_activated.len(), "Pending claims activated early");
            }
            best = Self::resolve_controller(&*store, name, height);
        }

        let mut takeover = None;
        if best != previous {
            match best {
                Some(winner) => {
                    store.record_takeover(name, height, winner)?;
                    tracing::info!(%name, height, claim_id = %winner, "Takeover");
                    takeover = Some(Takeover {
                        name: name.clone(),
                        height,
                        claim_hash: winner,
                    });
                }
                None => {
                    store.clear_controller(name)?;
                    tracing::info!(%name, height, "Name lost its controlling claim");
                }
            }
        }

        Ok(NameOutcome {
            previous,
            controller: best,
            early_activated,
            takeover,
        })
    }
}
