//! Activation scheduling for new and updated claims and for supports.

use crate::params::NetworkParams;
use crate::types::{ClaimHash, NameState};

/// What is being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationSubject {
    /// A new claim, or a new version of `claim_hash`.
    Claim(ClaimHash),
    /// A support for `target`.
    Support { target: ClaimHash },
}

impl ActivationSubject {
    fn claim_hash(&self) -> ClaimHash {
        match *self {
            Self::Claim(h) => h,
            Self::Support { target } => target,
        }
    }
}

/// Computes activation heights from the name's state *before* the current
/// block. Takeovers in the current block only affect the next block.
#[derive(Debug, Clone, Copy)]
pub struct ActivationScheduler<'a> {
    params: &'a NetworkParams,
}

impl<'a> ActivationScheduler<'a> {
    pub fn new(params: &'a NetworkParams) -> Self {
        Self { params }
    }

    /// Delay for a contested name at `height`: the delay rule in force at
    /// that height applied to the age of the current controller.
    pub fn delay_for(&self, state: &NameState, height: u32) -> u32 {
        self.params
            .delay_rule_at(height)
            .delay(height, state.last_takeover_height)
    }

    /// Activation height for `subject` placed at `height` on a name in `state`.
    ///
    /// Activation is immediate when the name has no controller, and when the
    /// subject is (or supports) the controlling claim.
    pub fn schedule_activation(&self, state: &NameState, subject: ActivationSubject, height: u32) -> u32 {
        match state.controller {
            None => height,
            Some(controller) if controller == subject.claim_hash() => height,
            Some(_) => height.saturating_add(self.delay_for(state, height)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{DelayException, DelayFormula, ExpirationParams};

    fn params() -> NetworkParams {
        NetworkParams::new(
            4032,
            32,
            ExpirationParams { original_window: 262_974, extended_window: 2_102_400, extended_fork_height: 0 },
        )
    }

    fn controlled(by: u8, since: u32) -> NameState {
        NameState { controller: Some(ClaimHash([by; 20])), last_takeover_height: since }
    }

    #[test]
    fn first_claim_is_immediate() {
        let p = params();
        let s = ActivationScheduler::new(&p);
        let h = s.schedule_activation(&NameState::default(), ActivationSubject::Claim(ClaimHash([1; 20])), 13);
        assert_eq!(h, 13);
    }

    #[test]
    fn contested_claim_is_delayed_by_name_age() {
        let p = params();
        let s = ActivationScheduler::new(&p);
        // (1001 - 13) / 32 = 30
        let h = s.schedule_activation(&controlled(1, 13), ActivationSubject::Claim(ClaimHash([2; 20])), 1001);
        assert_eq!(h, 1031);
    }

    #[test]
    fn support_for_controller_is_immediate() {
        let p = params();
        let s = ActivationScheduler::new(&p);
        let state = controlled(1, 13);
        let own = s.schedule_activation(&state, ActivationSubject::Support { target: ClaimHash([1; 20]) }, 1010);
        let other = s.schedule_activation(&state, ActivationSubject::Support { target: ClaimHash([2; 20]) }, 1010);
        assert_eq!(own, 1010);
        assert_eq!(other, 1010 + 31);
    }

    #[test]
    fn update_of_controller_is_immediate() {
        let p = params();
        let s = ActivationScheduler::new(&p);
        let h = s.schedule_activation(&controlled(1, 0), ActivationSubject::Claim(ClaimHash([1; 20])), 5000);
        assert_eq!(h, 5000);
    }

    #[test]
    fn delay_is_capped() {
        let p = params();
        let s = ActivationScheduler::new(&p);
        assert_eq!(s.delay_for(&controlled(1, 0), 1_000_000), 4032);
    }

    #[test]
    fn exception_window_overrides_rule() {
        let p = params().with_exception(DelayException {
            start_height: 500,
            end_height: 600,
            formula: DelayFormula::Fixed { blocks: 1 },
        });
        let s = ActivationScheduler::new(&p);
        assert_eq!(s.delay_for(&controlled(1, 0), 550), 1);
        assert_eq!(s.delay_for(&controlled(1, 0), 601), 18);
    }
}
