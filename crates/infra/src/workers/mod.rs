//! Background worker threads.

pub mod work_manager;

pub use work_manager::{Job, SchedulingError, WorkManager, WorkManagerConfig, WorkManagerStats};
