//! Benchmarks for StrataKV engine operations

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::TempDir;

use stratakv::{Config, Engine, WalSyncStrategy};

fn bench_config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        // Per-write fsync would benchmark the disk, not the engine.
        .wal_sync_strategy(WalSyncStrategy::EveryNRecords { count: 1000 })
        .build()
}

fn engine_benchmarks(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(bench_config(&dir)).unwrap();

    let mut i = 0u64;
    c.bench_function("put_sequential", |b| {
        b.iter(|| {
            i += 1;
            engine
                .put(format!("key{:012}", i), format!("value{:012}", i))
                .unwrap();
        })
    });

    // Populate a read set spanning memtable and tables.
    for j in 0..10_000u64 {
        engine
            .put(format!("read{:08}", j), format!("value{:08}", j))
            .unwrap();
    }
    engine.flush().unwrap();

    let mut j = 0u64;
    c.bench_function("get_hit", |b| {
        b.iter(|| {
            j = (j + 7919) % 10_000;
            let key = format!("read{:08}", j);
            engine.get(key.as_bytes()).unwrap().unwrap();
        })
    });

    c.bench_function("get_miss", |b| {
        b.iter(|| {
            engine.get(b"absent-key").unwrap();
        })
    });

    c.bench_function("scan_100", |b| {
        b.iter_batched(
            || (),
            |_| {
                engine
                    .iter(Some(b"read00001000"), Some(b"read00001100"))
                    .unwrap()
                    .count()
            },
            BatchSize::SmallInput,
        )
    });

    engine.close().unwrap();
}

criterion_group!(benches, engine_benchmarks);
criterion_main!(benches);
