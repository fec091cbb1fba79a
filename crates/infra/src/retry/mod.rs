//! Retry policy, state machine and executor.
//!
//! - `RetryPolicy`: how many attempts, how long to wait, where to run
//! - `RetryState`: the explicit per-unit transition function
//! - `RetryExecutor`: drives the state machine, synchronously or on a `WorkManager`

pub mod context;
pub mod executor;
pub mod policy;
pub mod state;

pub use context::RetryContext;
pub use executor::{AttemptFailure, RetryExecutor, RetryOutcome};
pub use policy::{BackoffStrategy, ExecutionMode, RetryPolicy, RetryPolicyError};
pub use state::{AttemptResult, RetryState};
