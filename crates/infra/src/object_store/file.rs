//! Filesystem-backed object store: one file per key.
//!
//! File names are the URL-safe base64 of the encoded key plus `.msg`, so any key text
//! maps to a portable file name and can be decoded back while listing.
//!
//! Writes go to a hidden temp file that is fsynced and then published with a hard
//! link. Linking fails if the target exists, which gives an atomic duplicate check
//! without holding a lock across processes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;

use super::r#trait::{KeyIter, ObjectStore, ObjectStoreError, StoreKey, decode_value, encode_value};

const EXTENSION: &str = ".msg";
const TEMP_EXTENSION: &str = ".tmp";

/// Object store persisting each value as a file under one directory.
///
/// The directory is created on first write. Reopening the same directory sees every
/// value stored before.
#[derive(Debug)]
pub struct FileObjectStore<K> {
    dir: PathBuf,
    _key: PhantomData<fn() -> K>,
}

impl<K: StoreKey> FileObjectStore<K> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _key: PhantomData,
        }
    }

    /// Like [`FileObjectStore::new`], creating the directory right away.
    ///
    /// Temp files left by writes interrupted by a crash are deleted, so no other
    /// process may be writing to the directory while it is opened.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ObjectStoreError> {
        let store = Self::new(dir);
        fs::create_dir_all(&store.dir).map_err(|e| io_error(&store.dir, e))?;
        store.sweep_temp_files()?;
        Ok(store)
    }

    fn sweep_temp_files(&self) -> Result<(), ObjectStoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let mut swept = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_temp_file(name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => swept += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(file = name, error = %err, "failed to delete stale temp file");
                }
            }
        }
        if swept > 0 {
            info!(dir = %self.dir.display(), swept, "deleted stale temp files");
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &K) -> PathBuf {
        self.dir.join(file_name(key))
    }

    fn read(&self, key: &K) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(key);
        fs::read(&path).map_err(|e| not_found_or_io(key, &path, e))
    }
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_EXTENSION)
}

fn file_name<K: StoreKey>(key: &K) -> String {
    format!("{}{EXTENSION}", URL_SAFE_NO_PAD.encode(key.encode()))
}

fn key_from_file_name<K: StoreKey>(name: &str) -> Result<K, ObjectStoreError> {
    let encoded = name
        .strip_suffix(EXTENSION)
        .ok_or_else(|| ObjectStoreError::Encoding(format!("'{name}' is not a record file")))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| ObjectStoreError::Encoding(format!("'{name}': {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| ObjectStoreError::Encoding(format!("'{name}': {e}")))?;
    K::decode(&text)
}

fn io_error(path: &Path, err: io::Error) -> ObjectStoreError {
    ObjectStoreError::Io(format!("{}: {err}", path.display()))
}

fn not_found_or_io<K: StoreKey>(key: &K, path: &Path, err: io::Error) -> ObjectStoreError {
    if err.kind() == io::ErrorKind::NotFound {
        ObjectStoreError::NotFound(key.to_string())
    } else {
        io_error(path, err)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl<K, V> ObjectStore<K, V> for FileObjectStore<K>
where
    K: StoreKey,
    V: Serialize + DeserializeOwned,
{
    fn store(&self, key: &K, value: &V) -> Result<(), ObjectStoreError> {
        let bytes = encode_value(value)?;
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{}{TEMP_EXTENSION}", Uuid::now_v7()));

        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(&tmp, err));
        }

        let linked = fs::hard_link(&tmp, &target);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ObjectStoreError::DuplicateKey(key.to_string()));
            }
            Err(err) => return Err(io_error(&target, err)),
        }

        sync_dir(&self.dir).map_err(|e| io_error(&self.dir, e))
    }

    fn retrieve(&self, key: &K) -> Result<Option<V>, ObjectStoreError> {
        let bytes = self.read(key)?;
        Ok(decode_value(key, &bytes))
    }

    fn remove(&self, key: &K) -> Result<Option<V>, ObjectStoreError> {
        let path = self.path_for(key);
        let bytes = self.read(key)?;

        // A concurrent remover may win between the read and the unlink.
        fs::remove_file(&path).map_err(|e| not_found_or_io(key, &path, e))?;
        sync_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        Ok(decode_value(key, &bytes))
    }

    fn contains(&self, key: &K) -> Result<bool, ObjectStoreError> {
        let path = self.path_for(key);
        path.try_exists().map_err(|e| io_error(&path, e))
    }

    fn all_keys(&self) -> Result<KeyIter<K>, ObjectStoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Box::new(std::iter::empty()));
            }
            Err(err) => return Err(io_error(&self.dir, err)),
        };

        let dir = self.dir.clone();
        let keys = entries.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "failed to read store entry");
                    return None;
                }
            };

            let name = entry.file_name();
            let name = name.to_str()?;
            // In-flight writes.
            if name.starts_with('.') {
                return None;
            }

            match key_from_file_name::<K>(name) {
                Ok(key) => Some(key),
                Err(err) => {
                    warn!(file = name, error = %err, "skipping unrecognised file in store");
                    None
                }
            }
        });

        Ok(Box::new(keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybus_core::{ClusterId, EventId, EventStoreKey, FlowName};

    fn key(id: &str) -> EventStoreKey {
        EventStoreKey::new(
            FlowName::parse("orders").unwrap(),
            ClusterId::local(),
            EventId::parse(id).unwrap(),
        )
    }

    #[test]
    fn file_names_round_trip_through_base64() {
        let k = key("evt/1:with odd chars");
        let name = file_name(&k);

        assert!(name.ends_with(".msg"));
        assert!(!name.contains('/'));
        assert_eq!(key_from_file_name::<EventStoreKey>(&name).unwrap(), k);
    }

    #[test]
    fn listing_a_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::<EventStoreKey>::new(dir.path().join("not-created"));

        let keys: Vec<EventStoreKey> = ObjectStore::<EventStoreKey, String>::all_keys(&store)
            .unwrap()
            .collect();
        assert!(keys.is_empty());
    }

    #[test]
    fn foreign_files_are_skipped_when_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::<EventStoreKey>::open(dir.path()).unwrap();
        store.store(&key("evt-1"), &"body".to_string()).unwrap();

        fs::write(dir.path().join("README.txt"), b"hi").unwrap();
        fs::write(dir.path().join("!!!.msg"), b"hi").unwrap();
        fs::write(dir.path().join(".pending.tmp"), b"hi").unwrap();

        let keys: Vec<EventStoreKey> = ObjectStore::<EventStoreKey, String>::all_keys(&store)
            .unwrap()
            .collect();
        assert_eq!(keys, vec![key("evt-1")]);
    }
}
