//! Criterion micro-benchmarks for the hot paths.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use loamdb::engine::{Engine, EngineConfig};
use tempfile::TempDir;

fn bench_set(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        // Keep the benchmark in-memory: no flushes, no fsync per write.
        max_memtable_size: 1024 * 1024 * 1024,
        wal_sync: false,
        ..EngineConfig::default()
    };
    let engine = Engine::open(tmp.path(), config).unwrap();

    let mut i = 0u64;
    c.bench_function("engine_set_64b", |b| {
        b.iter(|| {
            i += 1;
            engine
                .set(&format!("key_{i:012}"), "v".repeat(64))
                .unwrap();
        })
    });
}

fn bench_get(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        max_memtable_size: 1024 * 1024 * 1024,
        wal_sync: false,
        ..EngineConfig::default()
    };
    let engine = Engine::open(tmp.path(), config).unwrap();

    for i in 0..10_000u64 {
        engine
            .set(&format!("key_{i:012}"), "v".repeat(64))
            .unwrap();
    }

    let mut i = 0u64;
    c.bench_function("engine_get_memtable", |b| {
        b.iter(|| {
            i = (i + 7919) % 10_000;
            engine.get(&format!("key_{i:012}")).unwrap();
        })
    });
}

fn bench_get_from_sstable(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    // Tiny buffer: everything spills to SSTables.
    let config = EngineConfig {
        max_memtable_size: 16 * 1024,
        wal_sync: false,
        ..EngineConfig::default()
    };
    let engine = Engine::open(tmp.path(), config).unwrap();

    for i in 0..10_000u64 {
        engine
            .set(&format!("key_{i:012}"), "v".repeat(64))
            .unwrap();
    }

    let mut i = 0u64;
    c.bench_function("engine_get_sstable", |b| {
        b.iter(|| {
            i = (i + 7919) % 10_000;
            engine.get(&format!("key_{i:012}")).unwrap();
        })
    });
}

fn bench_skiplist_insert(c: &mut Criterion) {
    use loamdb::skiplist::SkipList;
    use loamdb::Entry;

    c.bench_function("skiplist_insert_10k", |b| {
        b.iter_batched(
            SkipList::new,
            |mut list| {
                for i in 0..10_000u64 {
                    list.set(Entry::put(
                        format!("key_{i:012}").into_bytes(),
                        b"value".to_vec(),
                        i,
                    ));
                }
                list
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_get_from_sstable,
    bench_skiplist_insert
);
criterion_main!(benches);
