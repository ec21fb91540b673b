//! # Recovery policy for dispatch workers.
//!
//! [`Recovery`] determines whether a hub's worker resumes serving its feeds after a
//! processing fault (a processor panicked or returned [`ProcessError::Fail`](crate::ProcessError)).
//!
//! - [`Recovery::Never`] the first fault stops the worker permanently (default).
//! - [`Recovery::Always`] the worker is restarted after every fault.
//! - [`Recovery::Limited`] the worker is restarted up to `n` times, then stops.
//!
//! Integer form (as accepted by `Recovery::from`):
//! ```text
//! -1 (any negative) → Always
//!  0                → Never
//!  n > 0            → Limited(n)
//! ```
//!
//! Faults raised by misuse (`Misuse`) or [`ProcessError::Fatal`](crate::ProcessError)
//! are never budgeted: they stop the worker even under `Always`.

/// Policy controlling worker restarts after processing faults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Recovery {
    /// Never restart: the first fault ends the worker.
    #[default]
    Never,
    /// Restart after every fault.
    Always,
    /// Restart after at most `n` faults.
    Limited(u32),
}

impl From<i64> for Recovery {
    fn from(value: i64) -> Self {
        match value {
            v if v < 0 => Recovery::Always,
            0 => Recovery::Never,
            v => Recovery::Limited(u32::try_from(v).unwrap_or(u32::MAX)),
        }
    }
}

impl Recovery {
    /// Creates a fresh budget from this policy.
    pub(crate) fn budget(self) -> RecoveryBudget {
        RecoveryBudget { policy: self }
    }
}

/// Remaining restarts of one worker.
///
/// Owned by the dispatch worker; never shared.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RecoveryBudget {
    policy: Recovery,
}

impl RecoveryBudget {
    /// Charges one fault against the budget.
    ///
    /// Returns `true` if the worker may restart.
    pub(crate) fn consume(&mut self) -> bool {
        match &mut self.policy {
            Recovery::Always => true,
            Recovery::Never | Recovery::Limited(0) => false,
            Recovery::Limited(n) => {
                *n -= 1;
                true
            }
        }
    }

    /// Remaining restarts (`None` = unbounded).
    pub(crate) fn remaining(&self) -> Option<u32> {
        match self.policy {
            Recovery::Always => None,
            Recovery::Never => Some(0),
            Recovery::Limited(n) => Some(n),
        }
    }
}
