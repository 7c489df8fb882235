//! End-to-end scenario 2 (spec.md §8): inserting rows whose dynamic-column
//! shapes differ must not require a schema migration, and a read back must
//! see the union of every shape observed so far with nulls where a row
//! didn't carry a given suffix.

use std::collections::HashMap;
use std::sync::Arc;

use frostdb::{
    CancellationToken, ColumnData, ColumnValues, Config, NullBucket, Record, ScalarValue, Schema,
    SortColumn, StorageType, WalConfig,
};

fn schema() -> Schema {
    Schema::parse(
        vec![
            frostdb::ColumnDef::new("value", StorageType::Int64, false),
            frostdb::ColumnDef::dynamic_prefix("labels", StorageType::Utf8),
        ],
        vec![SortColumn::asc("value")],
    )
    .unwrap()
}

fn labeled_record(value: i64, labels: &[(&str, &str)]) -> Record {
    let mut columns = HashMap::new();
    columns.insert(
        "value".to_string(),
        ColumnData { storage_type: StorageType::Int64, values: ColumnValues::Int64(vec![value]), nulls: vec![false] },
    );
    for (suffix, val) in labels {
        columns.insert(
            format!("labels.{suffix}"),
            ColumnData { storage_type: StorageType::Utf8, values: ColumnValues::Utf8(vec![val.to_string()]), nulls: vec![false] },
        );
    }
    Record::new(schema(), 1, columns).unwrap()
}

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        storage_path: dir.to_path_buf(),
        bucket: Arc::new(NullBucket),
        wal: WalConfig { enabled: false, dir: None, max_segment_bytes: 1024 * 1024, batch_interval_ms: 50, compression: frostdb::Compression::None },
        snapshot_trigger_size: u64::MAX,
        active_block_size: u64::MAX,
        granule_size: 1024,
        split_size: 2,
        index_degree: 8,
        ignore_storage_on_query: false,
        registrar: Arc::new(frostdb::NoopRegistrar),
    }
}

#[tokio::test]
async fn widening_dynamic_columns_round_trips_with_nulls_for_missing_suffixes() {
    let dir = tempfile::tempdir().unwrap();
    let db = frostdb::Database::open(test_config(dir.path())).unwrap();
    db.create_table("events", schema(), 2, vec![1_000_000; 2]).unwrap();
    let cancel = CancellationToken::new();

    // Row A carries labels.l1 + labels.l2; row B additionally introduces
    // labels.l3, a suffix never declared up front.
    db.insert("events", labeled_record(1, &[("l1", "a"), ("l2", "b")]), &cancel).unwrap();
    db.insert("events", labeled_record(2, &[("l1", "c"), ("l2", "d"), ("l3", "e")]), &cancel).unwrap();

    let table = db.table("events").unwrap();
    let watermark = db.begin_read();
    let parts = table.scan(watermark);
    assert_eq!(parts.iter().map(|p| p.num_rows()).sum::<usize>(), 2);

    let mut saw_l3_present = false;
    let mut saw_l3_absent = false;
    for part in &parts {
        let buffer = part.as_serialized_buffer();
        for rg in buffer.rowgroups() {
            for i in 0..rg.num_rows() {
                let row = rg.row(i);
                match row.get("labels.l3") {
                    Some(ScalarValue::Utf8(v)) => {
                        assert_eq!(v, "e");
                        saw_l3_present = true;
                    }
                    None => saw_l3_absent = true,
                    other => panic!("unexpected labels.l3 value: {other:?}"),
                }
            }
        }
    }
    assert!(saw_l3_present, "row B's labels.l3 must survive");
    assert!(saw_l3_absent, "row A must read back labels.l3 as missing, not an error");
}
