//! Message payloads.

use std::borrow::Cow;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Body of a message.
///
/// Every variant except [`Payload::Stream`] serializes as-is. A stream is a one-shot
/// reader: it has to be [materialized](Payload::materialize) before the event that
/// carries it can be persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    #[serde(skip)]
    Stream(PayloadStream),
}

impl Payload {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Self::Stream(PayloadStream::new(reader))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Read a stream payload fully into memory, turning it into [`Payload::Bytes`].
    ///
    /// No-op for every other variant.
    pub fn materialize(&mut self) -> io::Result<()> {
        if let Self::Stream(stream) = self {
            let bytes = stream.read_all()?;
            *self = Self::Bytes(bytes);
        }
        Ok(())
    }

    /// Textual view used by expressions. `None` for an unread stream.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Empty => Some(Cow::Borrowed("")),
            Self::Text(text) => Some(Cow::Borrowed(text)),
            Self::Bytes(bytes) => Some(String::from_utf8_lossy(bytes)),
            Self::Json(serde_json::Value::String(s)) => Some(Cow::Borrowed(s)),
            Self::Json(value) => Some(Cow::Owned(value.to_string())),
            Self::Stream(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

type SharedReader = Arc<Mutex<Option<Box<dyn Read + Send>>>>;

/// One-shot reader shared between clones of the same payload.
///
/// Whichever clone materializes first consumes the reader; the others then fail with
/// an `io::Error` instead of silently yielding an empty body.
#[derive(Clone)]
pub struct PayloadStream {
    reader: SharedReader,
}

impl PayloadStream {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(Box::new(reader)))),
        }
    }

    fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut guard = self
            .reader
            .lock()
            .map_err(|_| io::Error::other("payload stream lock poisoned"))?;
        let mut reader = guard
            .take()
            .ok_or_else(|| io::Error::other("payload stream already consumed"))?;

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl core::fmt::Debug for PayloadStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PayloadStream(..)")
    }
}

impl PartialEq for PayloadStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reader, &other.reader)
    }
}
