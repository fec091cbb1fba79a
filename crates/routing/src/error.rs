use thiserror::Error;

use relaybus_events::ExpressionError;
use relaybus_infra::{ObjectStoreError, SchedulingError};

/// Invalid router configuration. Raised while building, never at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("one message processor must be configured")]
    NoProcessor,

    #[error("only one message processor is allowed; use a chain to combine several")]
    MultipleProcessors,

    #[error("an object store must be configured")]
    MissingStore,

    #[error("invalid ack expression: {0}")]
    InvalidAckExpression(ExpressionError),

    #[error("invalid failure expression: {0}")]
    InvalidFailureExpression(ExpressionError),

    #[error("invalid retry settings: {0}")]
    InvalidRetrySettings(String),

    /// An environment variable held a value that could not be parsed.
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("failed to start work manager: {0}")]
    WorkManager(SchedulingError),
}

/// Failure of a router operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The event cannot be persisted. Nothing was stored.
    #[error("event is not serializable: {0}")]
    Serialization(String),

    #[error(transparent)]
    Store(#[from] ObjectStoreError),

    /// The event could not be scheduled. The record stored for it was removed again.
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}
