//! Shared types for the claim trie pipeline.

use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{hash160, Hash};
use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ClaimTrieError;
use crate::script::ClaimScript;

// ─── ClaimHash ────────────────────────────────────────────────────────────────

/// 20-byte claim identifier, content-addressed from the output that created
/// the claim.
///
/// The human-facing `claim_id` is the hex rendering of the bytes in reverse
/// order. Serialized forms always use the `claim_id`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ClaimHash(pub [u8; 20]);

impl ClaimHash {
    /// `HASH160(txid || vout as u32 big-endian)` of the creating output.
    pub fn from_outpoint(txo: &OutPoint) -> Self {
        let mut preimage = Vec::with_capacity(36);
        preimage.extend_from_slice(&txo.txid.to_byte_array());
        preimage.extend_from_slice(&txo.vout.to_be_bytes());
        Self(hash160::Hash::hash(&preimage).to_byte_array())
    }

    /// Interpret raw script bytes (as pushed in support/update scripts).
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 20]>::try_from(bytes).ok().map(Self)
    }

    /// Reversed-hex rendering of the hash.
    pub fn claim_id(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse a reversed-hex claim id.
    pub fn from_claim_id(claim_id: &str) -> Result<Self, ClaimTrieError> {
        let mut bytes = hex::decode(claim_id)
            .map_err(|_| ClaimTrieError::InvalidClaimId(claim_id.to_string()))?;
        bytes.reverse();
        Self::from_slice(&bytes).ok_or_else(|| ClaimTrieError::InvalidClaimId(claim_id.to_string()))
    }
}

impl fmt::Display for ClaimHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.claim_id())
    }
}

impl fmt::Debug for ClaimHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClaimHash({})", self.claim_id())
    }
}

impl FromStr for ClaimHash {
    type Err = ClaimTrieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_claim_id(s)
    }
}

impl Serialize for ClaimHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.claim_id())
    }
}

impl<'de> Deserialize<'de> for ClaimHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_claim_id(&s).map_err(serde::de::Error::custom)
    }
}

// ─── ClaimName ────────────────────────────────────────────────────────────────

/// A claimed name. Raw bytes: not guaranteed to be valid UTF-8.
///
/// Serialized as a string when the bytes are UTF-8, as a byte array otherwise.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ClaimName(Vec<u8>);

impl ClaimName {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ClaimName {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for ClaimName {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for ClaimName {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

impl fmt::Display for ClaimName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => f.write_str(s),
            None => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for ClaimName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClaimName({self})")
    }
}

impl Serialize for ClaimName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_str() {
            Some(s) => serializer.serialize_str(s),
            None => serializer.collect_seq(self.0.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for ClaimName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Bytes(Vec<u8>),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(s) => Self(s.into_bytes()),
            Repr::Bytes(b) => Self(b),
        })
    }
}

// ─── Positions and records ───────────────────────────────────────────────────

/// On-chain position of an output. The derived ordering (height, then
/// transaction index, then output index) is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxPosition {
    pub height: u32,
    pub tx_index: u32,
    pub output_index: u32,
}

/// The current version of a claim, as owned by the claim trie store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_hash: ClaimHash,
    /// Normalized name; the trie key.
    pub name: ClaimName,
    /// Name exactly as it appeared in the creating script.
    pub raw_name: ClaimName,
    /// Output currently holding the claim (changes on update).
    pub txo: OutPoint,
    /// Bid in dewies.
    pub amount: u64,
    /// Position of the output that first created this claim lineage.
    pub root: TxPosition,
    /// Height of the current version.
    pub height: u32,
    pub activation_height: u32,
    pub expiration_height: u32,
}

impl ClaimRecord {
    pub fn claim_id(&self) -> String {
        self.claim_hash.claim_id()
    }

    /// Height of the first claim in this lineage (preserved across updates).
    pub fn original_height(&self) -> u32 {
        self.root.height
    }

    pub fn is_active_at(&self, height: u32) -> bool {
        self.activation_height <= height
    }
}

/// A support backing a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportRecord {
    pub txo: OutPoint,
    pub claim_hash: ClaimHash,
    /// Normalized name of the supported claim.
    pub name: ClaimName,
    pub amount: u64,
    pub height: u32,
    pub activation_height: u32,
    pub expiration_height: u32,
}

impl SupportRecord {
    pub fn is_active_at(&self, height: u32) -> bool {
        self.activation_height <= height
    }
}

/// Controller bookkeeping for one name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameState {
    pub controller: Option<ClaimHash>,
    /// Height at which `controller` took over the name.
    pub last_takeover_height: u32,
}

/// A change of controlling claim for a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Takeover {
    pub name: ClaimName,
    pub height: u32,
    #[serde(rename = "claim_id")]
    pub claim_hash: ClaimHash,
}

// ─── Block input ──────────────────────────────────────────────────────────────

/// A minimal summary of a block; enough to verify chain continuity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u32,
    pub hash: String,
    pub prev_hash: String,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.height == parent.height + 1 && self.prev_hash == parent.hash
    }
}

/// A parsed block as supplied by the block-node collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u32,
    pub hash: String,
    pub prev_hash: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            height: self.height,
            hash: self.hash.clone(),
            prev_hash: self.prev_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: Txid,
    /// Outputs consumed by this transaction.
    #[serde(default)]
    pub inputs: Vec<OutPoint>,
    #[serde(default)]
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in dewies.
    pub value: u64,
    pub payload: OutputPayload,
}

/// Output contents: raw script bytes, or already classified by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPayload {
    Script(ScriptBuf),
    Classified(ClaimScript),
    Plain,
}

// ─── Change sets ──────────────────────────────────────────────────────────────

/// Controller change for one name within a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChange {
    pub name: ClaimName,
    pub new_controller: Option<String>,
    pub previous_controller: Option<String>,
}

/// Everything downstream consumers need to know about a committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub height: u32,
    pub block_hash: String,
    pub changed_names: Vec<NameChange>,
    /// Claim ids whose activation height equals this block's height.
    pub newly_activated: Vec<String>,
    pub takeovers: Vec<Takeover>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed_names.is_empty() && self.newly_activated.is_empty() && self.takeovers.is_empty()
    }
}

// ─── SyncContext ──────────────────────────────────────────────────────────────

/// Context passed to change-set and reorg handlers.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// The block just committed (or the new head after a rollback).
    pub block: BlockSummary,
    pub phase: SyncPhase,
    /// Network slug (e.g. `"mainnet"`).
    pub network: String,
}

/// The current phase of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Catching up to the block source tip.
    Backfill,
    /// Following the tip.
    Live,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
