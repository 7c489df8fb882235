//! End-to-end scenario 6 (spec.md §8): with `snapshot_trigger_size=1`, two
//! inserts cause exactly one snapshot directory to appear; recovering from
//! disk with the WAL replayed from `T+1` makes both inserts visible again.

use std::collections::HashMap;
use std::sync::Arc;

use frostdb::{CancellationToken, ColumnData, ColumnValues, Config, Database, NullBucket, Record, Schema, Snapshot, SortColumn, StorageType, WalConfig};

fn schema() -> Schema {
    Schema::parse(vec![frostdb::ColumnDef::new("value", StorageType::Int64, false)], vec![SortColumn::asc("value")]).unwrap()
}

fn record(value: i64) -> Record {
    let mut columns = HashMap::new();
    columns.insert("value".to_string(), ColumnData { storage_type: StorageType::Int64, values: ColumnValues::Int64(vec![value]), nulls: vec![false] });
    Record::new(schema(), 1, columns).unwrap()
}

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        storage_path: dir.to_path_buf(),
        bucket: Arc::new(NullBucket),
        wal: WalConfig { enabled: true, dir: None, max_segment_bytes: 1024 * 1024, batch_interval_ms: 10, compression: frostdb::Compression::None },
        snapshot_trigger_size: 1,
        active_block_size: u64::MAX,
        granule_size: 1024,
        split_size: 2,
        index_degree: 8,
        ignore_storage_on_query: false,
        registrar: Arc::new(frostdb::NoopRegistrar),
    }
}

#[tokio::test]
async fn snapshot_trigger_produces_one_directory_and_recovers_both_rows() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots_dir;
    {
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("events", schema(), 2, vec![1_000_000; 2]).unwrap();
        let cancel = CancellationToken::new();

        db.insert("events", record(1), &cancel).unwrap();
        db.insert("events", record(2), &cancel).unwrap();

        snapshots_dir = db.config().snapshots_dir();
        let mut complete_dirs = Vec::new();
        for _ in 0..200 {
            complete_dirs = list_complete_snapshots(&snapshots_dir);
            if !complete_dirs.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(complete_dirs.len(), 1, "exactly one snapshot directory should appear");
        // Close `db` before reopening the same storage path below —
        // FrostDB assumes a single writer per WAL (spec.md §4.5).
    }

    let restored = Database::open(test_config(dir.path())).unwrap();
    let snapshot_txn = Snapshot::load_latest(&restored, &snapshots_dir).unwrap().expect("a snapshot exists");
    restored.recover(Some(snapshot_txn)).unwrap();

    let table = restored.table("events").unwrap();
    let watermark = restored.txn_mgr().watermark();
    let total_rows: usize = table.scan(watermark).iter().map(|p| p.num_rows()).sum();
    assert_eq!(total_rows, 2, "both inserts must be visible after snapshot + WAL replay");
}

fn list_complete_snapshots(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.join("meta.json").exists())
        .collect()
}
