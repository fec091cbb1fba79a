use core::fmt;
use core::hash::Hash;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use relaybus_core::EventStoreKey;

/// Object store error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectStoreError {
    /// `store` was called for a key that already holds a value.
    #[error("key already present: {0}")]
    DuplicateKey(String),

    #[error("key not found: {0}")]
    NotFound(String),

    /// The value could not be encoded, or a key could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("io error: {0}")]
    Io(String),

    /// The store cannot serve requests (closed, lock poisoned).
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Keys an object store can file values under.
///
/// The textual encoding must round-trip: `decode(&k.encode()) == k`.
pub trait StoreKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {
    fn encode(&self) -> String;

    fn decode(text: &str) -> Result<Self, ObjectStoreError>;
}

impl StoreKey for EventStoreKey {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(text: &str) -> Result<Self, ObjectStoreError> {
        text.parse()
            .map_err(|e: relaybus_core::CoreError| ObjectStoreError::Encoding(e.to_string()))
    }
}

impl StoreKey for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(text: &str) -> Result<Self, ObjectStoreError> {
        Ok(text.to_string())
    }
}

/// Lazy sequence of keys. Every `all_keys` call starts a fresh scan.
pub type KeyIter<K> = Box<dyn Iterator<Item = K> + Send>;

/// Durable keyed store.
///
/// Implementations must:
/// - make every mutating operation durable before returning
/// - hand out owned copies: mutating a retrieved value never changes the stored one
/// - treat a record that can no longer be decoded as absent (`Ok(None)`), logging it
pub trait ObjectStore<K, V>: Send + Sync {
    /// Store `value` under `key`. Fails with `DuplicateKey` if the key is present.
    fn store(&self, key: &K, value: &V) -> Result<(), ObjectStoreError>;

    /// Fetch the value under `key`. Fails with `NotFound` if the key is absent.
    fn retrieve(&self, key: &K) -> Result<Option<V>, ObjectStoreError>;

    /// Remove and return the value under `key`. Fails with `NotFound` if the key is
    /// absent. An undecodable record is still removed.
    fn remove(&self, key: &K) -> Result<Option<V>, ObjectStoreError>;

    fn contains(&self, key: &K) -> Result<bool, ObjectStoreError>;

    fn all_keys(&self) -> Result<KeyIter<K>, ObjectStoreError>;
}

impl<K, V, S> ObjectStore<K, V> for Arc<S>
where
    S: ObjectStore<K, V> + ?Sized,
{
    fn store(&self, key: &K, value: &V) -> Result<(), ObjectStoreError> {
        (**self).store(key, value)
    }

    fn retrieve(&self, key: &K) -> Result<Option<V>, ObjectStoreError> {
        (**self).retrieve(key)
    }

    fn remove(&self, key: &K) -> Result<Option<V>, ObjectStoreError> {
        (**self).remove(key)
    }

    fn contains(&self, key: &K) -> Result<bool, ObjectStoreError> {
        (**self).contains(key)
    }

    fn all_keys(&self) -> Result<KeyIter<K>, ObjectStoreError> {
        (**self).all_keys()
    }
}

pub(crate) fn encode_value<V: Serialize>(value: &V) -> Result<Vec<u8>, ObjectStoreError> {
    serde_json::to_vec(value).map_err(|e| ObjectStoreError::Encoding(e.to_string()))
}

/// Decode a stored record, logging and discarding it if it is damaged.
pub(crate) fn decode_value<K: fmt::Display, V: DeserializeOwned>(
    key: &K,
    bytes: &[u8],
) -> Option<V> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(key = %key, error = %err, "stored record could not be decoded");
            None
        }
    }
}
