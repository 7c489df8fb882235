//! LSM level add/merge throughput (spec.md §4.3), grounded on the
//! teacher's engine-level compaction benchmarks
//! (`examples/abiolaogu-tdb-fork/benchmarks/rust_bench.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frostdb::lsm::compactor::{merge_level, RecordMergeCompactor};
use frostdb::lsm::LSMIndex;
use frostdb::metrics::NoopRegistrar;
use frostdb::{ColumnData, ColumnValues, Part, Record, Schema, SortColumn, StorageType};

fn schema() -> Schema {
    Schema::parse(vec![frostdb::ColumnDef::new("value", StorageType::Int64, false)], vec![SortColumn::asc("value")]).unwrap()
}

fn part(value: i64, txn: u64) -> Part {
    let mut columns = HashMap::new();
    columns.insert("value".to_string(), ColumnData { storage_type: StorageType::Int64, values: ColumnValues::Int64(vec![value]), nulls: vec![false] });
    let record = Record::new(schema(), 1, columns).unwrap();
    Part::from_record(record, txn, 64, 0)
}

fn bench_level_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("level_add");
    for n in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let lsm = LSMIndex::new(2);
                for i in 0..n {
                    lsm.add(0, black_box(part(i as i64, i as u64)));
                }
            });
        });
    }
    group.finish();
}

fn bench_merge_level(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_level");
    for n in [64usize, 256, 1024] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let lsm = LSMIndex::new(2);
                    for i in 0..n {
                        // Keys repeat mod 32 so most parts genuinely
                        // overlap and actually go through the compactor,
                        // rather than all being promoted untouched.
                        lsm.add(0, part((i % 32) as i64, i as u64));
                    }
                    lsm
                },
                |lsm| {
                    let schema = schema();
                    let registrar: Arc<dyn frostdb::Registrar> = Arc::new(NoopRegistrar);
                    merge_level(&lsm, 0, &schema, &RecordMergeCompactor, &[0, u64::MAX], &registrar).unwrap();
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_level_add, bench_merge_level);
criterion_main!(benches);
