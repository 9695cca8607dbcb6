//! Claim / support / abandon event extraction.
//!
//! Output classification is a pure function of each transaction and runs in
//! parallel. Linking spends to tracked outputs and updates to the claims they
//! replace is sequential, in on-chain order, because later transactions in a
//! block may spend outputs created by earlier ones.

use std::collections::{HashMap, HashSet};

use bitcoin::OutPoint;
use rayon::prelude::*;

use crate::error::ClaimTrieError;
use crate::normalize::Normalization;
use crate::script::ClaimScript;
use crate::store::ClaimTrieStore;
use crate::types::{Block, ClaimHash, ClaimName, OutputPayload, TxOutput, TxPosition};

/// One claim trie operation, in block order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEvent {
    ClaimCreated {
        name: ClaimName,
        raw_name: ClaimName,
        claim_hash: ClaimHash,
        amount: u64,
        txo: OutPoint,
        position: TxPosition,
    },
    ClaimUpdated {
        claim_hash: ClaimHash,
        prev_txo: OutPoint,
        new_txo: OutPoint,
        new_amount: u64,
        name: ClaimName,
        raw_name: ClaimName,
        position: TxPosition,
    },
    SupportAdded {
        claim_hash: ClaimHash,
        amount: u64,
        txo: OutPoint,
        position: TxPosition,
    },
    /// A tracked claim or support output was consumed.
    Spent { txo: OutPoint, position: TxPosition },
}

/// An output that carried a claim opcode but was not turned into an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOutput {
    pub txo: OutPoint,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub events: Vec<ClaimEvent>,
    pub skipped: Vec<SkippedOutput>,
}

/// Decode the claim operation carried by an output, if any.
pub fn classify_output(txo: &OutPoint, output: &TxOutput) -> Result<Option<ClaimScript>, ClaimTrieError> {
    match &output.payload {
        OutputPayload::Script(script) => {
            ClaimScript::parse(script).map_err(|flaw| ClaimTrieError::MalformedEvent {
                txo: txo.to_string(),
                reason: flaw.to_string(),
            })
        }
        OutputPayload::Classified(op) => Ok(Some(op.clone())),
        OutputPayload::Plain => Ok(None),
    }
}

#[derive(Debug, Clone)]
enum Tracked {
    Claim { claim_hash: ClaimHash, name: ClaimName },
    Support,
}

struct TrackedInput {
    txo: OutPoint,
    input_index: u32,
    claim: Option<(ClaimHash, ClaimName)>,
    linked: bool,
}

/// Turns blocks into ordered [`ClaimEvent`]s. Performs no trie mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventExtractor {
    normalization: Normalization,
}

impl EventExtractor {
    pub fn new(normalization: Normalization) -> Self {
        Self { normalization }
    }

    pub fn extract<S: ClaimTrieStore + ?Sized>(&self, block: &Block, store: &S) -> Extraction {
        let classified: Vec<Vec<(OutPoint, u64, Result<Option<ClaimScript>, ClaimTrieError>)>> = block
            .transactions
            .par_iter()
            .map(|tx| {
                tx.outputs
                    .iter()
                    .enumerate()
                    .map(|(vout, output)| {
                        let txo = OutPoint { txid: tx.txid, vout: vout as u32 };
                        let op = classify_output(&txo, output);
                        (txo, output.value, op)
                    })
                    .collect()
            })
            .collect();

        let mut extraction = Extraction::default();
        let mut created: HashMap<OutPoint, Tracked> = HashMap::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();

        for (tx_index, (tx, outputs)) in block.transactions.iter().zip(classified).enumerate() {
            let tx_index = tx_index as u32;

            let mut inputs: Vec<TrackedInput> = Vec::new();
            for (input_index, input) in tx.inputs.iter().enumerate() {
                let tracked = if spent.insert(*input) {
                    created.remove(input).or_else(|| self.lookup(store, input))
                } else {
                    // second spend inside the block; the processor rejects it
                    Some(Tracked::Support)
                };
                let claim = match tracked {
                    None => continue,
                    Some(Tracked::Claim { claim_hash, name }) => Some((claim_hash, name)),
                    Some(Tracked::Support) => None,
                };
                inputs.push(TrackedInput {
                    txo: *input,
                    input_index: input_index as u32,
                    claim,
                    linked: false,
                });
            }

            let mut output_events = Vec::new();
            for (txo, value, op) in outputs {
                let position = TxPosition {
                    height: block.height,
                    tx_index,
                    output_index: txo.vout,
                };
                let op = match op {
                    Ok(Some(op)) => op,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(height = block.height, %txo, error = %err, "Skipping malformed claim output");
                        extraction.skipped.push(SkippedOutput { txo, reason: err.to_string() });
                        continue;
                    }
                };
                match op {
                    ClaimScript::ClaimName { name: raw_name, .. } => {
                        let name = self.normalization.apply(&raw_name);
                        let claim_hash = ClaimHash::from_outpoint(&txo);
                        created.insert(txo, Tracked::Claim { claim_hash, name: name.clone() });
                        output_events.push(ClaimEvent::ClaimCreated {
                            name,
                            raw_name,
                            claim_hash,
                            amount: value,
                            txo,
                            position,
                        });
                    }
                    ClaimScript::UpdateClaim { name: raw_name, claim_hash, .. } => {
                        let name = self.normalization.apply(&raw_name);
                        let spent_claim = inputs.iter_mut().find(|i| {
                            !i.linked
                                && matches!(&i.claim, Some((hash, spent_name)) if *hash == claim_hash && *spent_name == name)
                        });
                        let Some(spent_claim) = spent_claim else {
                            let reason = format!("update of {claim_hash} does not spend the claim");
                            tracing::warn!(height = block.height, %txo, %reason, "Skipping claim update");
                            extraction.skipped.push(SkippedOutput { txo, reason });
                            continue;
                        };
                        spent_claim.linked = true;
                        created.insert(txo, Tracked::Claim { claim_hash, name: name.clone() });
                        output_events.push(ClaimEvent::ClaimUpdated {
                            claim_hash,
                            prev_txo: spent_claim.txo,
                            new_txo: txo,
                            new_amount: value,
                            name,
                            raw_name,
                            position,
                        });
                    }
                    ClaimScript::SupportClaim { claim_hash, .. }
                    | ClaimScript::SupportClaimData { claim_hash, .. } => {
                        created.insert(txo, Tracked::Support);
                        output_events.push(ClaimEvent::SupportAdded {
                            claim_hash,
                            amount: value,
                            txo,
                            position,
                        });
                    }
                }
            }

            extraction.events.extend(inputs.into_iter().filter(|i| !i.linked).map(|i| {
                ClaimEvent::Spent {
                    txo: i.txo,
                    position: TxPosition {
                        height: block.height,
                        tx_index,
                        output_index: i.input_index,
                    },
                }
            }));
            extraction.events.extend(output_events);
        }

        extraction
    }

    fn lookup<S: ClaimTrieStore + ?Sized>(&self, store: &S, txo: &OutPoint) -> Option<Tracked> {
        if let Some(claim) = store.get_claim_by_txo(txo) {
            return Some(Tracked::Claim {
                claim_hash: claim.claim_hash,
                name: claim.name,
            });
        }
        store.get_support_by_txo(txo).map(|_| Tracked::Support)
    }
}
