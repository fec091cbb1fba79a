//! Process-wide logging setup shared by relaybus binaries and tests.

pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Initialize logging from `RUST_LOG` / `RELAYBUS_LOG_FORMAT`.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    tracing::init(&LogConfig::from_env());
}
