use std::time::{Duration, Instant};

use super::policy::RetryPolicy;

/// Ephemeral state of one retry loop, handed to every attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    description: String,
    policy: RetryPolicy,
    attempt: u32,
    last_error: Option<String>,
    started_at: Instant,
}

impl RetryContext {
    pub fn new(description: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            description: description.into(),
            policy,
            attempt: 0,
            last_error: None,
            started_at: Instant::now(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current attempt, 1-indexed. Zero before the first attempt starts.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn begin_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}
