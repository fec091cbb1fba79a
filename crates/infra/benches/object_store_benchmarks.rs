use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use relaybus_core::{ClusterId, EventId, EventStoreKey, FlowName, KeyBuilder};
use relaybus_events::{MessageEvent, Payload};
use relaybus_infra::{FileObjectStore, InMemoryObjectStore, ObjectStore};

fn events(count: usize, payload_bytes: usize) -> Vec<(EventStoreKey, MessageEvent)> {
    let builder = KeyBuilder::new(ClusterId::local());
    let flow = FlowName::parse("bench").unwrap();
    (0..count)
        .map(|i| {
            let ev = MessageEvent::with_id(
                EventId::parse(format!("evt-{i}")).unwrap(),
                flow.clone(),
                Payload::Bytes(vec![b'x'; payload_bytes]),
            )
            .with_process_attempt_count(1);
            (builder.build_for(&ev), ev)
        })
        .collect()
}

/// Store, retrieve and remove each event once: the life of a unit that succeeds
/// on its first attempt.
fn store_retrieve_remove<S>(store: &S, batch: &[(EventStoreKey, MessageEvent)])
where
    S: ObjectStore<EventStoreKey, MessageEvent>,
{
    for (key, ev) in batch {
        store.store(key, ev).unwrap();
        black_box(store.retrieve(key).unwrap());
        black_box(store.remove(key).unwrap());
    }
}

fn bench_in_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_memory_object_store");
    for payload_bytes in [64usize, 4096] {
        let batch = events(100, payload_bytes);
        group.throughput(Throughput::Elements(batch.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_bytes),
            &batch,
            |b, batch| {
                let store = InMemoryObjectStore::<EventStoreKey>::new();
                b.iter(|| store_retrieve_remove(&store, batch));
            },
        );
    }
    group.finish();
}

fn bench_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_object_store");
    group.sample_size(10);
    for payload_bytes in [64usize, 4096] {
        let batch = events(20, payload_bytes);
        group.throughput(Throughput::Elements(batch.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_bytes),
            &batch,
            |b, batch| {
                let dir = tempfile::tempdir().unwrap();
                let store = FileObjectStore::<EventStoreKey>::open(dir.path()).unwrap();
                b.iter(|| store_retrieve_remove(&store, batch));
            },
        );
    }
    group.finish();
}

fn bench_all_keys(c: &mut Criterion) {
    let store = InMemoryObjectStore::<EventStoreKey>::new();
    for (key, ev) in events(1_000, 64) {
        store.store(&key, &ev).unwrap();
    }

    c.bench_function("in_memory_all_keys_1000", |b| {
        b.iter(|| {
            ObjectStore::<EventStoreKey, MessageEvent>::all_keys(&store)
                .unwrap()
                .count()
        })
    });
}

criterion_group!(benches, bench_in_memory, bench_file, bench_all_keys);
criterion_main!(benches);
