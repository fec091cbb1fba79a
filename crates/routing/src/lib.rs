//! `relaybus-routing` — routers that sit between a flow and its processors.
//!
//! [`UntilSuccessful`] persists each event it accepts and keeps redelivering it to a
//! single processor until it succeeds or runs out of retries.

pub mod config;
pub mod error;
pub mod until_successful;

pub use config::UntilSuccessfulConfig;
pub use error::{ConfigError, RoutingError};
pub use until_successful::{
    EventObjectStore, FailureDisposition, ResumeReport, RoutingStats, UntilSuccessful,
    UntilSuccessfulBuilder,
};
