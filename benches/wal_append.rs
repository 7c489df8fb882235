//! WAL append/flush throughput, grounded on the teacher's commitlog-style
//! append benchmarks (`examples/clockworklabs-SpacetimeDB/crates/commitlog/benches`).
//! Measures the cost of the batched-append path (spec.md §4.5) under
//! sequential txn ids, the common case for a single writer.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frostdb::metrics::NoopRegistrar;
use frostdb::{Compression, WalConfig};
use tempfile::TempDir;

fn new_wal(dir: &TempDir, compression: Compression) -> Arc<frostdb::Wal> {
    let config = WalConfig {
        enabled: true,
        dir: Some(dir.path().to_path_buf()),
        max_segment_bytes: 64 * 1024 * 1024,
        batch_interval_ms: 50,
        compression,
    };
    frostdb::Wal::open(dir.path().to_path_buf(), &config, Arc::new(NoopRegistrar)).unwrap()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_append_sequential");
    let payload = vec![0u8; 256];

    for compression in [Compression::None, Compression::Lz4, Compression::Zstd] {
        let label = match compression {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        };
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("append", label), &compression, |b, &compression| {
            let dir = tempfile::tempdir().unwrap();
            let wal = new_wal(&dir, compression);
            let mut txn = 0u64;
            b.iter(|| {
                wal.append(txn, black_box(payload.clone())).unwrap();
                txn += 1;
            });
        });
    }
    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    c.bench_function("wal_flush_1000_entries", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let wal = new_wal(&dir, Compression::None);
                for txn in 0..1000u64 {
                    wal.append(txn, vec![0u8; 64]).unwrap();
                }
                (dir, wal)
            },
            |(_dir, wal)| wal.flush().unwrap(),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_append, bench_flush);
criterion_main!(benches);
