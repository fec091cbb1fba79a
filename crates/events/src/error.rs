use thiserror::Error;

/// Failure reported by a downstream processor or a dead-letter sink.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// The processor raised an error while handling the event.
    #[error("processing failed: {0}")]
    Failed(String),

    /// The processor is not able to accept events right now (closed, disconnected).
    #[error("processor unavailable: {0}")]
    Unavailable(String),
}

impl ProcessingError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Expression text that could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,

    /// The expression must be written as `#[...]` in this position.
    #[error("'{0}' is not an expression, it must be enclosed in #[...]")]
    NotWrapped(String),

    #[error("unknown expression term '{0}'")]
    UnknownTerm(String),

    /// A comparison right-hand side must be a single-quoted literal.
    #[error("malformed comparison in '{0}'")]
    MalformedComparison(String),
}
