use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::r#trait::{KeyIter, ObjectStore, ObjectStoreError, StoreKey, decode_value, encode_value};

/// In-memory object store.
///
/// Intended for tests/dev. Values are kept encoded, so every `retrieve` yields an
/// independent copy and undecodable records behave as they do in a durable store.
#[derive(Debug)]
pub struct InMemoryObjectStore<K> {
    entries: RwLock<HashMap<K, Vec<u8>>>,
}

impl<K: StoreKey> InMemoryObjectStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert pre-encoded bytes, bypassing the codec and the duplicate check.
    pub fn store_raw(&self, key: K, bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key, bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for InMemoryObjectStore<K> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

fn poisoned() -> ObjectStoreError {
    ObjectStoreError::Unavailable("lock poisoned".to_string())
}

impl<K, V> ObjectStore<K, V> for InMemoryObjectStore<K>
where
    K: StoreKey,
    V: Serialize + DeserializeOwned,
{
    fn store(&self, key: &K, value: &V) -> Result<(), ObjectStoreError> {
        let bytes = encode_value(value)?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if entries.contains_key(key) {
            return Err(ObjectStoreError::DuplicateKey(key.to_string()));
        }
        entries.insert(key.clone(), bytes);
        Ok(())
    }

    fn retrieve(&self, key: &K) -> Result<Option<V>, ObjectStoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let bytes = entries
            .get(key)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        Ok(decode_value(key, bytes))
    }

    fn remove(&self, key: &K) -> Result<Option<V>, ObjectStoreError> {
        let bytes = self
            .entries
            .write()
            .map_err(|_| poisoned())?
            .remove(key)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        Ok(decode_value(key, &bytes))
    }

    fn contains(&self, key: &K) -> Result<bool, ObjectStoreError> {
        Ok(self.entries.read().map_err(|_| poisoned())?.contains_key(key))
    }

    fn all_keys(&self) -> Result<KeyIter<K>, ObjectStoreError> {
        let keys: Vec<K> = self
            .entries
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .cloned()
            .collect();
        Ok(Box::new(keys.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        body: String,
        count: u32,
    }

    fn record(body: &str) -> Record {
        Record {
            body: body.to_string(),
            count: 1,
        }
    }

    #[test]
    fn store_then_retrieve_returns_an_equal_value() {
        let store = InMemoryObjectStore::<String>::new();
        let key = "k1".to_string();

        store.store(&key, &record("a")).unwrap();
        let back: Option<Record> = store.retrieve(&key).unwrap();

        assert_eq!(back, Some(record("a")));
    }

    #[test]
    fn duplicate_store_is_rejected() {
        let store = InMemoryObjectStore::<String>::new();
        let key = "k1".to_string();

        store.store(&key, &record("a")).unwrap();
        let err = store.store(&key, &record("b")).unwrap_err();

        assert_eq!(err, ObjectStoreError::DuplicateKey("k1".to_string()));
        let kept: Option<Record> = store.retrieve(&key).unwrap();
        assert_eq!(kept, Some(record("a")));
    }

    #[test]
    fn second_remove_fails_with_not_found() {
        let store = InMemoryObjectStore::<String>::new();
        let key = "k1".to_string();
        store.store(&key, &record("a")).unwrap();

        let removed: Option<Record> = store.remove(&key).unwrap();
        assert_eq!(removed, Some(record("a")));

        let again: Result<Option<Record>, _> = store.remove(&key);
        assert_eq!(again, Err(ObjectStoreError::NotFound("k1".to_string())));

        let gone: Result<Option<Record>, _> = store.retrieve(&key);
        assert_eq!(gone, Err(ObjectStoreError::NotFound("k1".to_string())));
    }

    #[test]
    fn retrieved_values_are_independent_copies() {
        let store = InMemoryObjectStore::<String>::new();
        let key = "k1".to_string();
        store.store(&key, &record("a")).unwrap();

        let mut copy: Record = store.retrieve(&key).unwrap().unwrap();
        copy.count = 99;

        let fresh: Record = store.retrieve(&key).unwrap().unwrap();
        assert_eq!(fresh.count, 1);
    }

    #[test]
    fn corrupt_records_read_as_absent_and_are_still_removable() {
        let store = InMemoryObjectStore::<String>::new();
        let key = "broken".to_string();
        store.store_raw(key.clone(), b"{not json".to_vec()).unwrap();

        let read: Option<Record> = store.retrieve(&key).unwrap();
        assert_eq!(read, None);

        let removed: Option<Record> = store.remove(&key).unwrap();
        assert_eq!(removed, None);
        assert!(store.is_empty());
    }

    #[test]
    fn all_keys_restarts_on_every_call() {
        let store = InMemoryObjectStore::<String>::new();
        for k in ["a", "b", "c"] {
            store.store(&k.to_string(), &record(k)).unwrap();
        }

        let mut first: Vec<String> = ObjectStore::<String, Record>::all_keys(&store)
            .unwrap()
            .collect();
        let mut second: Vec<String> = ObjectStore::<String, Record>::all_keys(&store)
            .unwrap()
            .collect();
        first.sort();
        second.sort();

        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
    }
}
