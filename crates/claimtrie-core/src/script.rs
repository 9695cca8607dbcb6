//! Claim script classification.
//!
//! Claim operations are encoded as a prefix in front of a regular payee
//! script:
//!
//! ```text
//! OP_CLAIM_NAME   <name> <value>              OP_2DROP OP_DROP  <payee>
//! OP_SUPPORT_CLAIM <name> <claim_id>          OP_2DROP OP_DROP  <payee>
//! OP_SUPPORT_CLAIM <name> <claim_id> <data>   OP_2DROP OP_2DROP <payee>
//! OP_UPDATE_CLAIM  <name> <claim_id> <value>  OP_2DROP OP_2DROP <payee>
//! ```

use bitcoin::opcodes::all::{OP_2DROP, OP_DROP};
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Script, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::types::{ClaimHash, ClaimName};

pub const OP_CLAIM_NAME: u8 = 0xb5;
pub const OP_SUPPORT_CLAIM: u8 = 0xb6;
pub const OP_UPDATE_CLAIM: u8 = 0xb7;

/// A decoded claim operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClaimScript {
    ClaimName {
        name: ClaimName,
        #[serde(with = "hex::serde")]
        value: Vec<u8>,
    },
    UpdateClaim {
        name: ClaimName,
        #[serde(rename = "claim_id")]
        claim_hash: ClaimHash,
        #[serde(with = "hex::serde")]
        value: Vec<u8>,
    },
    SupportClaim {
        name: ClaimName,
        #[serde(rename = "claim_id")]
        claim_hash: ClaimHash,
    },
    SupportClaimData {
        name: ClaimName,
        #[serde(rename = "claim_id")]
        claim_hash: ClaimHash,
        #[serde(with = "hex::serde")]
        data: Vec<u8>,
    },
}

/// Why a script carrying a claim opcode could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptFlaw {
    InvalidScript,
    MissingPush(&'static str),
    BadClaimId(usize),
    BadTrailer,
}

impl std::fmt::Display for ScriptFlaw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidScript => write!(f, "script does not decode"),
            Self::MissingPush(what) => write!(f, "expected a data push for {what}"),
            Self::BadClaimId(len) => write!(f, "claim id must be 20 bytes, got {len}"),
            Self::BadTrailer => write!(f, "claim prefix is not terminated by the drop opcodes"),
        }
    }
}

impl ClaimScript {
    /// Decode the claim prefix of `script`.
    ///
    /// Returns `Ok(None)` for scripts that do not start with a claim opcode.
    pub fn parse(script: &Script) -> Result<Option<Self>, ScriptFlaw> {
        let mut instructions = script.instructions();

        let opcode = match instructions.next() {
            Some(Ok(Instruction::Op(op))) => op.to_u8(),
            _ => return Ok(None),
        };
        if !matches!(opcode, OP_CLAIM_NAME | OP_SUPPORT_CLAIM | OP_UPDATE_CLAIM) {
            return Ok(None);
        }

        let mut pushes: Vec<Vec<u8>> = Vec::with_capacity(3);
        let mut trailer: Vec<Opcode> = Vec::with_capacity(2);
        for instruction in instructions {
            match instruction {
                Ok(Instruction::PushBytes(push)) if trailer.is_empty() => {
                    pushes.push(push.as_bytes().to_vec());
                }
                Ok(Instruction::Op(op)) if op == OP_2DROP || op == OP_DROP => {
                    trailer.push(op);
                    if trailer.len() == 2 {
                        break;
                    }
                }
                Ok(_) => return Err(ScriptFlaw::BadTrailer),
                Err(_) => return Err(ScriptFlaw::InvalidScript),
            }
        }

        let short = [OP_2DROP, OP_DROP];
        let long = [OP_2DROP, OP_2DROP];
        let mut pushes = pushes.into_iter();
        let mut next = |what| pushes.next().ok_or(ScriptFlaw::MissingPush(what));

        let decoded = match opcode {
            OP_CLAIM_NAME => {
                let name = ClaimName::new(next("name")?);
                let value = next("value")?;
                expect_trailer(&trailer, &short)?;
                Self::ClaimName { name, value }
            }
            OP_UPDATE_CLAIM => {
                let name = ClaimName::new(next("name")?);
                let claim_hash = claim_hash_from(next("claim_id")?)?;
                let value = next("value")?;
                expect_trailer(&trailer, &long)?;
                Self::UpdateClaim { name, claim_hash, value }
            }
            _ => {
                let name = ClaimName::new(next("name")?);
                let claim_hash = claim_hash_from(next("claim_id")?)?;
                if trailer == short {
                    Self::SupportClaim { name, claim_hash }
                } else {
                    let data = next("data")?;
                    expect_trailer(&trailer, &long)?;
                    Self::SupportClaimData { name, claim_hash, data }
                }
            }
        };
        if next("").is_ok() {
            return Err(ScriptFlaw::BadTrailer);
        }
        Ok(Some(decoded))
    }

    /// Encode this operation in front of `payee`.
    pub fn to_script(&self, payee: &Script) -> Result<ScriptBuf, ScriptFlaw> {
        let (opcode, pushes, trailer): (u8, Vec<&[u8]>, [Opcode; 2]) = match self {
            Self::ClaimName { name, value } => {
                (OP_CLAIM_NAME, vec![name.as_bytes(), value.as_slice()], [OP_2DROP, OP_DROP])
            }
            Self::UpdateClaim { name, claim_hash, value } => (
                OP_UPDATE_CLAIM,
                vec![name.as_bytes(), &claim_hash.0[..], value.as_slice()],
                [OP_2DROP, OP_2DROP],
            ),
            Self::SupportClaim { name, claim_hash } => (
                OP_SUPPORT_CLAIM,
                vec![name.as_bytes(), &claim_hash.0[..]],
                [OP_2DROP, OP_DROP],
            ),
            Self::SupportClaimData { name, claim_hash, data } => (
                OP_SUPPORT_CLAIM,
                vec![name.as_bytes(), &claim_hash.0[..], data.as_slice()],
                [OP_2DROP, OP_2DROP],
            ),
        };

        let mut builder = Builder::new().push_opcode(Opcode::from(opcode));
        for bytes in pushes {
            let push = PushBytesBuf::try_from(bytes.to_vec()).map_err(|_| ScriptFlaw::InvalidScript)?;
            builder = builder.push_slice(push);
        }
        for op in trailer {
            builder = builder.push_opcode(op);
        }
        let mut script = builder.into_script().into_bytes();
        script.extend_from_slice(payee.as_bytes());
        Ok(ScriptBuf::from_bytes(script))
    }

    pub fn name(&self) -> &ClaimName {
        match self {
            Self::ClaimName { name, .. }
            | Self::UpdateClaim { name, .. }
            | Self::SupportClaim { name, .. }
            | Self::SupportClaimData { name, .. } => name,
        }
    }
}

fn claim_hash_from(bytes: Vec<u8>) -> Result<ClaimHash, ScriptFlaw> {
    ClaimHash::from_slice(&bytes).ok_or(ScriptFlaw::BadClaimId(bytes.len()))
}

fn expect_trailer(found: &[Opcode], expected: &[Opcode; 2]) -> Result<(), ScriptFlaw> {
    if found == expected {
        Ok(())
    } else {
        Err(ScriptFlaw::BadTrailer)
    }
}
