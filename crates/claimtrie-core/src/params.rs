//! Network parameters: takeover delay, expiration windows and the
//! height-ranged consensus exceptions.
//!
//! Nothing here has a built-in network default. Parameters are loaded from
//! JSON (see [`NetworkParams::from_json`]) and validated once, at startup.

use serde::{Deserialize, Serialize};

use crate::error::ClaimTrieError;
use crate::normalize::Normalization;

/// Default number of committed heights kept in the undo journal.
pub const DEFAULT_UNDO_DEPTH: u32 = 200;

// ─── Delay formulas ──────────────────────────────────────────────────────────

/// How the activation delay is derived from the height and the name's last
/// takeover height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayFormula {
    /// `min(max_delay, (height + height_offset - last_takeover) / factor)`.
    Proportional {
        factor: u32,
        max_delay: u32,
        #[serde(default)]
        height_offset: u32,
    },
    /// A constant delay.
    Fixed { blocks: u32 },
}

impl DelayFormula {
    pub fn delay(&self, height: u32, last_takeover_height: u32) -> u32 {
        match *self {
            Self::Proportional { factor, max_delay, height_offset } => {
                let age = height
                    .saturating_add(height_offset)
                    .saturating_sub(last_takeover_height);
                (age / factor.max(1)).min(max_delay)
            }
            Self::Fixed { blocks } => blocks,
        }
    }
}

/// A consensus exception: `formula` replaces the regular delay rule for
/// heights in `start_height..=end_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayException {
    pub start_height: u32,
    pub end_height: u32,
    pub formula: DelayFormula,
}

impl DelayException {
    pub fn contains(&self, height: u32) -> bool {
        (self.start_height..=self.end_height).contains(&height)
    }
}

// ─── Expiration ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationParams {
    /// Expiration window for claims and supports placed before the fork.
    pub original_window: u32,
    /// Expiration window from `extended_fork_height` on.
    pub extended_window: u32,
    pub extended_fork_height: u32,
}

impl ExpirationParams {
    pub fn expiration_height(&self, height: u32) -> u32 {
        let window = if height < self.extended_fork_height {
            self.original_window
        } else {
            self.extended_window
        };
        height.saturating_add(window)
    }
}

// ─── NetworkParams ────────────────────────────────────────────────────────────

/// Validated network parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkParams {
    /// Upper bound on the activation delay, in blocks.
    pub max_takeover_delay: u32,
    /// Blocks of name age per block of delay.
    pub proportional_delay_factor: u32,
    pub expiration: ExpirationParams,
    /// Sorted, non-overlapping exception windows.
    pub delay_exceptions: Vec<DelayException>,
    pub normalization: Normalization,
    /// Committed heights kept for rollback.
    pub undo_depth: u32,
}

/// Wire shape of [`NetworkParams`]; every field optional so that missing
/// ones can be reported by name.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNetworkParams {
    max_takeover_delay: Option<u32>,
    proportional_delay_factor: Option<u32>,
    expiration: Option<RawExpiration>,
    #[serde(default)]
    delay_exceptions: Vec<DelayException>,
    normalization: Option<Normalization>,
    undo_depth: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExpiration {
    original_window: Option<u32>,
    extended_window: Option<u32>,
    extended_fork_height: Option<u32>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ClaimTrieError> {
    value.ok_or_else(|| ClaimTrieError::ConfigMissing { field: field.to_string() })
}

impl NetworkParams {
    /// Parameters with the regular delay rule and no exceptions.
    pub fn new(
        max_takeover_delay: u32,
        proportional_delay_factor: u32,
        expiration: ExpirationParams,
    ) -> Self {
        Self {
            max_takeover_delay,
            proportional_delay_factor,
            expiration,
            delay_exceptions: vec![],
            normalization: Normalization::default(),
            undo_depth: DEFAULT_UNDO_DEPTH,
        }
    }

    pub fn with_exception(mut self, exception: DelayException) -> Self {
        self.delay_exceptions.push(exception);
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_undo_depth(mut self, undo_depth: u32) -> Self {
        self.undo_depth = undo_depth;
        self
    }

    /// Parse and validate parameters from JSON.
    pub fn from_json(json: &str) -> Result<Self, ClaimTrieError> {
        let raw: RawNetworkParams = serde_json::from_str(json)
            .map_err(|e| ClaimTrieError::ConfigInvalid { reason: e.to_string() })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawNetworkParams) -> Result<Self, ClaimTrieError> {
        let expiration = required(raw.expiration, "expiration")?;
        let params = Self {
            max_takeover_delay: required(raw.max_takeover_delay, "max_takeover_delay")?,
            proportional_delay_factor: required(
                raw.proportional_delay_factor,
                "proportional_delay_factor",
            )?,
            expiration: ExpirationParams {
                original_window: required(expiration.original_window, "expiration.original_window")?,
                extended_window: required(expiration.extended_window, "expiration.extended_window")?,
                extended_fork_height: required(
                    expiration.extended_fork_height,
                    "expiration.extended_fork_height",
                )?,
            },
            delay_exceptions: raw.delay_exceptions,
            normalization: raw.normalization.unwrap_or_default(),
            undo_depth: raw.undo_depth.unwrap_or(DEFAULT_UNDO_DEPTH),
        };
        params.validate()?;
        Ok(params)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ClaimTrieError> {
        let invalid = |reason: String| Err(ClaimTrieError::ConfigInvalid { reason });

        if self.proportional_delay_factor == 0 {
            return invalid("proportional_delay_factor must be positive".into());
        }
        if self.expiration.original_window == 0 || self.expiration.extended_window == 0 {
            return invalid("expiration windows must be positive".into());
        }
        if self.undo_depth == 0 {
            return invalid("undo_depth must be positive".into());
        }
        for (i, exception) in self.delay_exceptions.iter().enumerate() {
            if exception.start_height > exception.end_height {
                return invalid(format!(
                    "delay exception {i}: start_height {} > end_height {}",
                    exception.start_height, exception.end_height
                ));
            }
            if let DelayFormula::Proportional { factor: 0, .. } = exception.formula {
                return invalid(format!("delay exception {i}: factor must be positive"));
            }
            if i > 0 && self.delay_exceptions[i - 1].end_height >= exception.start_height {
                return invalid(format!(
                    "delay exception {i} overlaps or precedes exception {}",
                    i - 1
                ));
            }
        }
        Ok(())
    }

    /// Delay rule in force at `height`.
    pub fn delay_rule_at(&self, height: u32) -> DelayFormula {
        self.delay_exceptions
            .iter()
            .find(|e| e.contains(height))
            .map(|e| e.formula)
            .unwrap_or(DelayFormula::Proportional {
                factor: self.proportional_delay_factor,
                max_delay: self.max_takeover_delay,
                height_offset: 0,
            })
    }

    /// Expiration height for a claim or support placed (or updated) at `height`.
    pub fn expiration_height(&self, height: u32) -> u32 {
        self.expiration.expiration_height(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "max_takeover_delay": 4032,
        "proportional_delay_factor": 32,
        "expiration": {
            "original_window": 262974,
            "extended_window": 2102400,
            "extended_fork_height": 400155
        },
        "delay_exceptions": [
            { "start_height": 100, "end_height": 200,
              "formula": { "kind": "proportional", "factor": 32, "max_delay": 4032, "height_offset": 1 } },
            { "start_height": 300, "end_height": 300,
              "formula": { "kind": "fixed", "blocks": 7 } }
        ]
    }"#;

    #[test]
    fn parses_full_params() {
        let p = NetworkParams::from_json(FULL).unwrap();
        assert_eq!(p.max_takeover_delay, 4032);
        assert_eq!(p.delay_exceptions.len(), 2);
        assert_eq!(p.undo_depth, DEFAULT_UNDO_DEPTH);
        assert_eq!(p.normalization, Normalization::NfdCasefold);
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let err = NetworkParams::from_json(r#"{ "proportional_delay_factor": 32 }"#).unwrap_err();
        match err {
            ClaimTrieError::ConfigMissing { field } => assert_eq!(field, "expiration"),
            other => panic!("unexpected error: {other}"),
        }

        let err = NetworkParams::from_json(
            r#"{ "proportional_delay_factor": 32,
                 "expiration": { "original_window": 1, "extended_window": 1, "extended_fork_height": 0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ClaimTrieError::ConfigMissing { field } if field == "max_takeover_delay"));
    }

    #[test]
    fn overlapping_exceptions_rejected() {
        let exp = ExpirationParams { original_window: 10, extended_window: 20, extended_fork_height: 5 };
        let p = NetworkParams::new(4032, 32, exp)
            .with_exception(DelayException {
                start_height: 10,
                end_height: 20,
                formula: DelayFormula::Fixed { blocks: 1 },
            })
            .with_exception(DelayException {
                start_height: 20,
                end_height: 30,
                formula: DelayFormula::Fixed { blocks: 2 },
            });
        assert!(matches!(p.validate(), Err(ClaimTrieError::ConfigInvalid { .. })));
    }

    #[test]
    fn delay_rule_respects_exception_windows() {
        let p = NetworkParams::from_json(FULL).unwrap();
        // regular rule
        assert_eq!(p.delay_rule_at(99).delay(99, 0), 3);
        // offset formula: (127 + 1) / 32 = 4, regular would be 3
        assert_eq!(p.delay_rule_at(127).delay(127, 0), 4);
        assert_eq!(p.delay_rule_at(300).delay(300, 0), 7);
        assert_eq!(p.delay_rule_at(301).delay(301, 0), 9);
    }

    #[test]
    fn proportional_delay_is_capped() {
        let f = DelayFormula::Proportional { factor: 32, max_delay: 4032, height_offset: 0 };
        assert_eq!(f.delay(1_000_000, 0), 4032);
        assert_eq!(f.delay(1121, 801), 10);
        assert_eq!(f.delay(5, 10), 0);
    }

    #[test]
    fn expiration_switches_at_fork() {
        let p = NetworkParams::from_json(FULL).unwrap();
        assert_eq!(p.expiration_height(400_154), 400_154 + 262_974);
        assert_eq!(p.expiration_height(400_155), 400_155 + 2_102_400);
    }
}
