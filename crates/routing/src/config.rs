//! Router configuration.

use std::str::FromStr;
use std::time::Duration;

use relaybus_core::{ClusterId, FlowName};
use relaybus_infra::ExecutionMode;

use crate::error::ConfigError;

pub const ENV_FLOW: &str = "RELAYBUS_FLOW";
pub const ENV_CLUSTER_ID: &str = "RELAYBUS_CLUSTER_ID";
pub const ENV_MAX_RETRIES: &str = "RELAYBUS_MAX_RETRIES";
pub const ENV_SECONDS_BETWEEN_RETRIES: &str = "RELAYBUS_SECONDS_BETWEEN_RETRIES";
pub const ENV_FAILURE_EXPRESSION: &str = "RELAYBUS_FAILURE_EXPRESSION";
pub const ENV_ACK_EXPRESSION: &str = "RELAYBUS_ACK_EXPRESSION";
pub const ENV_ATTEMPTS_PER_CYCLE: &str = "RELAYBUS_ATTEMPTS_PER_CYCLE";
pub const ENV_EXECUTION_MODE: &str = "RELAYBUS_EXECUTION_MODE";
pub const ENV_WORKER_THREADS: &str = "RELAYBUS_WORKER_THREADS";

/// Configuration of an [`UntilSuccessful`](crate::UntilSuccessful) router.
#[derive(Debug, Clone, PartialEq)]
pub struct UntilSuccessfulConfig {
    /// Flow that owns the router; also the first segment of every store key
    pub flow: FlowName,
    /// Cluster node the router runs on
    pub cluster_id: ClusterId,
    /// How many times a failed event is re-armed before it is given up on
    pub max_retries: u32,
    /// Wait before each redelivery (and between attempts within a cycle)
    pub between_retries: Duration,
    /// Condition on a processor's result event that marks it as failed.
    /// `None` means "the result carries an exception payload".
    pub failure_expression: Option<String>,
    /// Value returned to the caller of `submit`; must be a `#[...]` expression
    pub ack_expression: Option<String>,
    /// Attempts per redelivery cycle, the durable counter only moves between cycles
    pub attempts_per_cycle: u32,
    pub execution_mode: ExecutionMode,
    pub worker_threads: usize,
    pub queue_capacity: usize,
}

impl Default for UntilSuccessfulConfig {
    fn default() -> Self {
        Self {
            flow: FlowName::default(),
            cluster_id: ClusterId::local(),
            max_retries: 5,
            between_retries: Duration::from_secs(60),
            failure_expression: None,
            ack_expression: None,
            attempts_per_cycle: 1,
            execution_mode: ExecutionMode::Asynchronous,
            worker_threads: 4,
            queue_capacity: 256,
        }
    }
}

impl UntilSuccessfulConfig {
    pub fn new(flow: FlowName) -> Self {
        Self {
            flow,
            ..Self::default()
        }
    }

    /// Defaults overridden by `RELAYBUS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(flow) = parse_var(&lookup, ENV_FLOW)? {
            config.flow = flow;
        }
        if let Some(cluster_id) = parse_var(&lookup, ENV_CLUSTER_ID)? {
            config.cluster_id = cluster_id;
        }
        if let Some(max_retries) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            config.max_retries = max_retries;
        }
        if let Some(seconds) = parse_var::<u64, _>(&lookup, ENV_SECONDS_BETWEEN_RETRIES)? {
            config.between_retries = Duration::from_secs(seconds);
        }
        if let Some(expr) = lookup(ENV_FAILURE_EXPRESSION).filter(|s| !s.trim().is_empty()) {
            config.failure_expression = Some(expr);
        }
        if let Some(expr) = lookup(ENV_ACK_EXPRESSION).filter(|s| !s.trim().is_empty()) {
            config.ack_expression = Some(expr);
        }
        if let Some(attempts) = parse_var(&lookup, ENV_ATTEMPTS_PER_CYCLE)? {
            config.attempts_per_cycle = attempts;
        }
        if let Some(raw) = lookup(ENV_EXECUTION_MODE) {
            config.execution_mode = match raw.trim().to_ascii_lowercase().as_str() {
                "sync" | "synchronous" => ExecutionMode::Synchronous,
                "async" | "asynchronous" => ExecutionMode::Asynchronous,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_EXECUTION_MODE,
                        value: raw,
                    });
                }
            };
        }
        if let Some(threads) = parse_var(&lookup, ENV_WORKER_THREADS)? {
            config.worker_threads = threads;
        }

        Ok(config)
    }

    pub fn with_cluster_id(mut self, cluster_id: ClusterId) -> Self {
        self.cluster_id = cluster_id;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_seconds_between_retries(mut self, seconds: u64) -> Self {
        self.between_retries = Duration::from_secs(seconds);
        self
    }

    pub fn with_between_retries(mut self, delay: Duration) -> Self {
        self.between_retries = delay;
        self
    }

    pub fn with_failure_expression(mut self, expr: impl Into<String>) -> Self {
        self.failure_expression = Some(expr.into());
        self
    }

    pub fn with_ack_expression(mut self, expr: impl Into<String>) -> Self {
        self.ack_expression = Some(expr.into());
        self
    }

    pub fn with_attempts_per_cycle(mut self, attempts: u32) -> Self {
        self.attempts_per_cycle = attempts;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}
