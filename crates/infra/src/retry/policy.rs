//! Retry policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryPolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Where a retry loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The caller's thread runs the whole loop, delays included.
    Synchronous,
    /// The loop is handed to a worker pool and the caller returns immediately.
    #[default]
    Asynchronous,
}

/// How the wait grows from one attempt to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    /// Doubles after every attempt.
    Exponential,
    /// Grows by the base delay after every attempt.
    Linear,
}

/// Immutable retry policy.
///
/// `max_attempts` counts every invocation, the first one included, and is always at
/// least 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    jitter: f64,
    execution_mode: ExecutionMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
            execution_mode: ExecutionMode::default(),
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            delay,
            max_delay: delay,
            ..Self::default()
        })
    }

    /// Exponential backoff starting at `base_delay`, capped at `max_delay`.
    pub fn exponential(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, RetryPolicyError> {
        Ok(Self {
            max_delay,
            strategy: BackoffStrategy::Exponential,
            ..Self::fixed(max_attempts, base_delay)?
        })
    }

    /// Linear backoff starting at `base_delay`, capped at `max_delay`.
    pub fn linear(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, RetryPolicyError> {
        Ok(Self {
            max_delay,
            strategy: BackoffStrategy::Linear,
            ..Self::fixed(max_attempts, base_delay)?
        })
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// Delay to wait after the given (1-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let cap = self.max_delay.max(self.delay);
        let step = match self.strategy {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(cap)
            }
            BackoffStrategy::Linear => self.delay.saturating_mul(attempt).min(cap),
        };

        if self.jitter <= 0.0 || step.is_zero() {
            return step;
        }

        // Deterministic spread in -1.0..1.0 derived from the attempt number.
        let spread = f64::from(attempt.wrapping_mul(17) % 100) / 50.0 - 1.0;
        let step_ms = step.as_millis() as f64;
        let offset_ms = step_ms * self.jitter * spread;
        Duration::from_millis((step_ms + offset_ms).max(0.0) as u64)
    }

    /// Whether another attempt follows a failed `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
