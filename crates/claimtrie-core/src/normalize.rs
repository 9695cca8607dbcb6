//! Claim name normalization applied before every trie lookup.

use serde::{Deserialize, Serialize};
use caseless::default_case_fold_str;
use unicode_normalization::UnicodeNormalization;

use crate::types::ClaimName;

/// Normalization rule set for claim names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Names are compared byte for byte.
    None,
    /// Unicode NFD decomposition followed by full default case folding
    /// (so `ß` folds to `ss`). Names that are not valid UTF-8 are left
    /// untouched.
    #[default]
    NfdCasefold,
}

impl Normalization {
    pub fn apply(&self, raw: &ClaimName) -> ClaimName {
        match self {
            Self::None => raw.clone(),
            Self::NfdCasefold => match raw.as_str() {
                Some(s) => ClaimName::from(default_case_fold_str(&s.nfd().collect::<String>()).as_str()),
                None => raw.clone(),
            },
        }
    }
}
