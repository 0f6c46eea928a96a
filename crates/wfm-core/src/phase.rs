//! Migration phase state machine
//!
//! ```text
//! NotStarted -> Validating -> NothingToDo
//!                          -> MappingRequired -> Validating (resubmitted mapping)
//!                          -> Running -> Success | SuccessWithFailures | Aborted
//!                          -> Success (nothing needed a background task)
//! ```

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    #[default]
    NotStarted,
    Validating,
    NothingToDo,
    MappingRequired,
    Running,
    Success,
    SuccessWithFailures,
    Aborted,
}

impl MigrationPhase {
    pub const ALL: [MigrationPhase; 8] = [
        MigrationPhase::NotStarted,
        MigrationPhase::Validating,
        MigrationPhase::NothingToDo,
        MigrationPhase::MappingRequired,
        MigrationPhase::Running,
        MigrationPhase::Success,
        MigrationPhase::SuccessWithFailures,
        MigrationPhase::Aborted,
    ];

    /// No further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }

    /// Validated transition to `to`
    ///
    /// # Errors
    /// `InvalidTransition` if `to` is not reachable from `self`.
    pub fn advance(&mut self, to: MigrationPhase) -> Result<(), MigrationError> {
        validate_transition(*self, to)?;
        tracing::trace!(from = %self, to = %to, "migration phase change");
        *self = to;
        Ok(())
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Validating => "validating",
            Self::NothingToDo => "nothing to do",
            Self::MappingRequired => "mapping required",
            Self::Running => "running",
            Self::Success => "success",
            Self::SuccessWithFailures => "success with failures",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: MigrationPhase) -> &'static [MigrationPhase] {
    use MigrationPhase::{
        Aborted, MappingRequired, NotStarted, NothingToDo, Running, Success, SuccessWithFailures, Validating,
    };
    match from {
        NotStarted => &[Validating],
        Validating => &[NothingToDo, MappingRequired, Running, Success],
        MappingRequired => &[Validating],
        Running => &[Success, SuccessWithFailures, Aborted],
        NothingToDo | Success | SuccessWithFailures | Aborted => &[],
    }
}

/// Check a phase change
///
/// # Errors
/// `InvalidTransition` if `to` is not in [`allowed_transitions`] of `from`.
pub fn validate_transition(from: MigrationPhase, to: MigrationPhase) -> Result<(), MigrationError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(MigrationError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn happy_path() {
        let mut phase = MigrationPhase::default();
        for next in [
            MigrationPhase::Validating,
            MigrationPhase::MappingRequired,
            MigrationPhase::Validating,
            MigrationPhase::Running,
            MigrationPhase::SuccessWithFailures,
        ] {
            phase.advance(next).unwrap();
        }
        assert!(phase.is_terminal());
    }

    #[test]
    fn cannot_skip_validation() {
        let mut phase = MigrationPhase::NotStarted;
        let err = phase.advance(MigrationPhase::Running).unwrap_err();
        assert!(err.is_programmer_error());
        assert_eq!(phase, MigrationPhase::NotStarted);

        assert!(validate_transition(MigrationPhase::MappingRequired, MigrationPhase::Running).is_err());
        assert!(validate_transition(MigrationPhase::Aborted, MigrationPhase::Running).is_err());
    }

    proptest! {
        #[test]
        fn prop_validation_agrees_with_table(
            from in proptest::sample::select(MigrationPhase::ALL.to_vec()),
            to in proptest::sample::select(MigrationPhase::ALL.to_vec()),
        ) {
            let allowed = allowed_transitions(from).contains(&to);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed);
        }
    }
}
