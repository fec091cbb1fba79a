//! Durability of the filesystem object store.

use std::fs;

use relaybus_core::{ClusterId, EventId, EventStoreKey, FlowName, KeyBuilder};
use relaybus_events::{MessageEvent, Payload};
use relaybus_infra::{FileObjectStore, ObjectStore, ObjectStoreError};

fn event(id: &str) -> MessageEvent {
    MessageEvent::with_id(
        EventId::parse(id).unwrap(),
        FlowName::parse("orders").unwrap(),
        Payload::text(format!("payload of {id}")),
    )
    .with_process_attempt_count(1)
}

fn key_for(ev: &MessageEvent) -> EventStoreKey {
    KeyBuilder::new(ClusterId::local()).build_for(ev)
}

type Store = FileObjectStore<EventStoreKey>;

fn keys(store: &Store) -> Vec<EventStoreKey> {
    let mut keys: Vec<EventStoreKey> = ObjectStore::<EventStoreKey, MessageEvent>::all_keys(store)
        .unwrap()
        .collect();
    keys.sort();
    keys
}

#[test]
fn values_survive_reopening_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let a = event("evt-a");
    let b = event("evt-b");

    {
        let store = Store::open(dir.path()).unwrap();
        store.store(&key_for(&a), &a).unwrap();
        store.store(&key_for(&b), &b).unwrap();
    }

    let reopened = Store::new(dir.path());
    let mut expected = vec![key_for(&a), key_for(&b)];
    expected.sort();
    assert_eq!(keys(&reopened), expected);

    let back: Option<MessageEvent> = reopened.retrieve(&key_for(&a)).unwrap();
    assert_eq!(back, Some(a));
}

#[test]
fn duplicate_store_leaves_the_first_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let ev = event("evt-1");
    let key = key_for(&ev);

    store.store(&key, &ev).unwrap();
    let second = ev.clone().with_process_attempt_count(7);
    assert_eq!(
        store.store(&key, &second),
        Err(ObjectStoreError::DuplicateKey(key.to_string()))
    );

    let kept: MessageEvent = store.retrieve(&key).unwrap().unwrap();
    assert_eq!(kept.process_attempt_count(), Some(1));
}

#[test]
fn remove_deletes_the_file_and_a_second_remove_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let ev = event("evt-1");
    let key = key_for(&ev);
    store.store(&key, &ev).unwrap();

    let removed: Option<MessageEvent> = store.remove(&key).unwrap();
    assert_eq!(removed, Some(ev));
    assert!(keys(&store).is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

    let again: Result<Option<MessageEvent>, _> = store.remove(&key);
    assert_eq!(again, Err(ObjectStoreError::NotFound(key.to_string())));
}

#[test]
fn corrupt_record_reads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let ev = event("evt-1");
    let key = key_for(&ev);
    store.store(&key, &ev).unwrap();

    // Damage the only record file in place.
    let path = fs::read_dir(dir.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    fs::write(&path, b"\x00\x01 definitely not json").unwrap();

    let read: Option<MessageEvent> = store.retrieve(&key).unwrap();
    assert_eq!(read, None);

    let removed: Option<MessageEvent> = store.remove(&key).unwrap();
    assert_eq!(removed, None);
    assert!(keys(&store).is_empty());
}

#[test]
fn contains_tracks_store_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let ev = event("evt-1");
    let key = key_for(&ev);

    let contains = |s: &Store| ObjectStore::<EventStoreKey, MessageEvent>::contains(s, &key).unwrap();

    assert!(!contains(&store));
    store.store(&key, &ev).unwrap();
    assert!(contains(&store));
    let _: Option<MessageEvent> = store.remove(&key).unwrap();
    assert!(!contains(&store));
}

#[test]
fn opening_deletes_temp_files_left_by_interrupted_writes() {
    let dir = tempfile::tempdir().unwrap();
    let ev = event("evt-1");
    {
        let store = Store::open(dir.path()).unwrap();
        store.store(&key_for(&ev), &ev).unwrap();
    }
    fs::write(dir.path().join(".0190b2c4-crashed.tmp"), b"{\"half\":").unwrap();
    fs::write(dir.path().join(".keep"), b"not ours").unwrap();

    let store = Store::open(dir.path()).unwrap();

    assert!(!dir.path().join(".0190b2c4-crashed.tmp").exists());
    assert!(dir.path().join(".keep").exists());
    assert_eq!(keys(&store), vec![key_for(&ev)]);
}
