//! `relaybus-events` — the message model and the SPIs around it.
//!
//! - [`MessageEvent`]: the unit of work that gets persisted and redelivered
//! - [`MessageProcessor`]: the downstream step a router hands events to
//! - [`DeadLetterSink`]: where exhausted events end up
//! - [`Expression`]: failure filters and acknowledgement values

pub mod dead_letter;
pub mod error;
pub mod event;
pub mod expression;
pub mod payload;
pub mod processor;

pub use dead_letter::{DeadLetterSink, InMemoryDeadLetterQueue, ProcessorSink};
pub use error::{ExpressionError, ProcessingError};
pub use event::{ExceptionPayload, InvocationProperties, Message, MessageEvent};
pub use expression::Expression;
pub use payload::{Payload, PayloadStream};
pub use processor::{MessageProcessor, processor_fn};
