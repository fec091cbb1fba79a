//! The per-unit retry state machine.
//!
//! ```text
//! Idle --start--> Executing(1)
//! Executing(n) --ok--> Succeeded
//! Executing(n) --recoverable error, n < max--> Waiting(n+1, delay) --resume--> Executing(n+1)
//! Executing(n) --recoverable error, n == max--> Exhausted
//! Executing(n) --fatal error--> Abandoned
//! ```

use std::time::Duration;

use super::policy::RetryPolicy;

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Success,
    /// Worth another attempt, if the policy allows one.
    RecoverableFailure,
    /// No further attempt can succeed.
    FatalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Executing { attempt: u32 },
    Waiting { next_attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Abandoned { attempts: u32 },
}

impl RetryState {
    /// Idle → Executing(1). Any other state is returned unchanged.
    pub fn start(self) -> Self {
        match self {
            Self::Idle => Self::Executing { attempt: 1 },
            other => other,
        }
    }

    /// Waiting → Executing. Any other state is returned unchanged.
    pub fn resume(self) -> Self {
        match self {
            Self::Waiting { next_attempt, .. } => Self::Executing {
                attempt: next_attempt,
            },
            other => other,
        }
    }

    /// Transition out of `Executing` once an attempt has finished.
    ///
    /// Results reported outside of `Executing` leave the state unchanged.
    pub fn on_attempt_result(self, result: AttemptResult, policy: &RetryPolicy) -> Self {
        let Self::Executing { attempt } = self else {
            return self;
        };

        match result {
            AttemptResult::Success => Self::Succeeded { attempts: attempt },
            AttemptResult::FatalFailure => Self::Abandoned { attempts: attempt },
            AttemptResult::RecoverableFailure if policy.should_retry(attempt) => Self::Waiting {
                next_attempt: attempt + 1,
                delay: policy.delay_for_attempt(attempt),
            },
            AttemptResult::RecoverableFailure => Self::Exhausted { attempts: attempt },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Exhausted { .. } | Self::Abandoned { .. }
        )
    }
}
