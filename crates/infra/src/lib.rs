//! Infrastructure layer: durable storage, retry execution, worker threads.

pub mod object_store;
pub mod retry;
pub mod workers;

pub use object_store::{
    FileObjectStore, InMemoryObjectStore, KeyIter, ObjectStore, ObjectStoreError, StoreKey,
};
pub use retry::{
    AttemptFailure, BackoffStrategy, ExecutionMode, RetryContext, RetryExecutor, RetryOutcome,
    RetryPolicy, RetryPolicyError,
};
pub use workers::{SchedulingError, WorkManager, WorkManagerConfig, WorkManagerStats};
