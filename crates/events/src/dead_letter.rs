//! Destinations for events whose redelivery was exhausted.

use std::sync::{Arc, Mutex};

use crate::error::ProcessingError;
use crate::event::MessageEvent;
use crate::processor::MessageProcessor;

/// Receives events that exhausted their retries.
pub trait DeadLetterSink: Send + Sync {
    fn send(&self, event: MessageEvent) -> Result<(), ProcessingError>;
}

impl<S> DeadLetterSink for Arc<S>
where
    S: DeadLetterSink + ?Sized,
{
    fn send(&self, event: MessageEvent) -> Result<(), ProcessingError> {
        (**self).send(event)
    }
}

/// Uses any message processor as a dead-letter destination. The processor's result
/// event, if any, is discarded.
pub struct ProcessorSink<P> {
    processor: P,
}

impl<P: MessageProcessor> ProcessorSink<P> {
    pub fn new(processor: P) -> Self {
        Self { processor }
    }
}

impl<P: MessageProcessor> DeadLetterSink for ProcessorSink<P> {
    fn send(&self, event: MessageEvent) -> Result<(), ProcessingError> {
        self.processor.process(event).map(|_| ())
    }
}

/// Dead-letter queue kept in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    events: Mutex<Vec<MessageEvent>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything dead-lettered so far, oldest first.
    pub fn events(&self) -> Vec<MessageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for InMemoryDeadLetterQueue {
    fn send(&self, event: MessageEvent) -> Result<(), ProcessingError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| ProcessingError::unavailable("dead-letter queue lock poisoned"))?;
        tracing::debug!(event_id = %event.id(), flow = %event.flow(), "event dead-lettered");
        events.push(event);
        Ok(())
    }
}
