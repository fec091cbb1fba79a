//! `relaybus-core` — identity building blocks for the redelivery engine.
//!
//! This crate contains **pure** primitives (no IO, no threads): typed identifiers and the
//! composite store key every persisted unit of work is filed under.

pub mod error;
pub mod id;
pub mod key;

pub use error::{CoreError, CoreResult};
pub use id::{ClusterId, EventId, FlowName};
pub use key::{EventStoreKey, KeyBuilder, KeySource};
