//! The unit of work carried through a flow.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relaybus_core::{EventId, FlowName, KeySource};

use crate::payload::Payload;

/// Error attached to a message by the processor that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    pub exception_type: String,
    pub message: String,
}

impl ExceptionPayload {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
        }
    }
}

/// Invocation-scoped properties of a message.
///
/// `process_attempt_count` is how many times the redelivery engine has tried this
/// event. It lives on the event itself, so it is persisted with it. Absent means the
/// event has not been attempted yet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvocationProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_attempt_count: Option<u32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    pub payload: Payload,
    #[serde(default)]
    pub properties: InvocationProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_payload: Option<ExceptionPayload>,
}

impl Message {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }
}

/// A message travelling through a flow, with a stable identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    id: EventId,
    flow: FlowName,
    message: Message,
    created_at: DateTime<Utc>,
}

impl MessageEvent {
    /// New event with a generated id.
    pub fn new(flow: FlowName, payload: impl Into<Payload>) -> Self {
        Self::with_id(EventId::generate(), flow, payload)
    }

    pub fn with_id(id: EventId, flow: FlowName, payload: impl Into<Payload>) -> Self {
        Self {
            id,
            flow,
            message: Message::new(payload),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn flow(&self) -> &FlowName {
        &self.flow
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn payload(&self) -> &Payload {
        &self.message.payload
    }

    pub fn properties(&self) -> &InvocationProperties {
        &self.message.properties
    }

    pub fn exception_payload(&self) -> Option<&ExceptionPayload> {
        self.message.exception_payload.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn process_attempt_count(&self) -> Option<u32> {
        self.message.properties.process_attempt_count
    }

    pub fn set_process_attempt_count(&mut self, count: u32) {
        self.message.properties.process_attempt_count = Some(count);
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.message.properties.extensions.get(name)
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.message
            .properties
            .extensions
            .insert(name.into(), value.into());
        self
    }

    pub fn with_exception_payload(mut self, exception: ExceptionPayload) -> Self {
        self.message.exception_payload = Some(exception);
        self
    }

    pub fn with_process_attempt_count(mut self, count: u32) -> Self {
        self.set_process_attempt_count(count);
        self
    }

    /// Move the event into another flow, keeping its identity and message.
    pub fn with_flow(mut self, flow: FlowName) -> Self {
        self.flow = flow;
        self
    }

    /// Copy of this event (same id, flow and properties) carrying a different payload
    /// and no attached exception.
    pub fn with_payload(&self, payload: impl Into<Payload>) -> Self {
        Self {
            id: self.id.clone(),
            flow: self.flow.clone(),
            message: Message {
                payload: payload.into(),
                properties: self.message.properties.clone(),
                exception_payload: None,
            },
            created_at: Utc::now(),
        }
    }

    /// Read a stream payload fully into memory. See [`Payload::materialize`].
    pub fn materialize_payload(&mut self) -> std::io::Result<()> {
        self.message.payload.materialize()
    }
}

impl KeySource for MessageEvent {
    fn event_id(&self) -> &EventId {
        &self.id
    }

    fn flow(&self) -> &FlowName {
        &self.flow
    }
}
