//! Downstream processing SPI.

use crate::error::ProcessingError;
use crate::event::MessageEvent;

/// Processes one event.
///
/// - `Ok(None)`: processed, nothing to hand back.
/// - `Ok(Some(event))`: processed, with a resulting event. Callers may still inspect
///   the result (for example for an attached exception payload) and treat it as a
///   failure.
/// - `Err(_)`: processing failed.
///
/// Implementations must be thread-safe: asynchronous redelivery invokes them from
/// worker threads.
pub trait MessageProcessor: Send + Sync {
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, ProcessingError>;
}

impl<F> MessageProcessor for F
where
    F: Fn(MessageEvent) -> Result<Option<MessageEvent>, ProcessingError> + Send + Sync,
{
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, ProcessingError> {
        (self)(event)
    }
}

/// Pins a closure's signature so it can be passed where a `MessageProcessor` is
/// expected without annotating argument and return types.
pub fn processor_fn<F>(f: F) -> F
where
    F: Fn(MessageEvent) -> Result<Option<MessageEvent>, ProcessingError> + Send + Sync,
{
    f
}
