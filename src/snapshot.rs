//! Point-in-time snapshots coordinated with the WAL (spec.md §4.8).
//!
//! A snapshot captures every table's live parts as of the current
//! commit watermark, writes them under a txn-numbered directory, and
//! only then truncates the WAL up to that watermark — so a crash
//! between those two steps just means the next recovery replays a few
//! extra WAL records instead of losing data. `meta.json` is written
//! last; its presence is what marks a snapshot directory complete.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::Result;
use crate::part::Part;
use crate::schema::Schema;
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
struct SnapshotPartMeta {
    level: usize,
    file: String,
    txn_id: u64,
    size_bytes: u64,
}

#[derive(Serialize, Deserialize)]
struct SnapshotTableMeta {
    name: String,
    schema: Schema,
    level_max_size: Vec<u64>,
    parts: Vec<SnapshotPartMeta>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotMeta {
    txn: u64,
    tables: Vec<SnapshotTableMeta>,
}

pub struct Snapshot;

impl Snapshot {
    /// Writes every table's parts as of `db.txn_mgr().watermark()` into
    /// `config.snapshots_dir()`, then truncates the WAL up to that
    /// watermark. Returns the snapshot's txn.
    pub async fn write(db: &Arc<Database>) -> Result<u64> {
        let txn = db.txn_mgr().watermark();
        let dir = db.config().snapshots_dir().join(dir_name(txn));
        std::fs::create_dir_all(&dir)?;

        let mut tables_meta = Vec::new();
        for table in db.tables() {
            let table_dir = dir.join(table.name());
            std::fs::create_dir_all(&table_dir)?;

            let mut parts_meta = Vec::new();
            for (i, part) in table.scan(txn).into_iter().enumerate() {
                let file_name = format!("part-{i:06}.bin");
                let bytes = part.as_serialized_buffer().to_bytes()?;
                std::fs::write(table_dir.join(&file_name), &bytes)?;
                parts_meta.push(SnapshotPartMeta {
                    level: part.level(),
                    file: file_name,
                    txn_id: part.txn_id(),
                    size_bytes: part.size_bytes(),
                });
            }

            tables_meta.push(SnapshotTableMeta {
                name: table.name().to_string(),
                schema: (**table.schema()).clone(),
                level_max_size: table.plan().max_size.clone(),
                parts: parts_meta,
            });
        }

        let meta = SnapshotMeta { txn, tables: tables_meta };
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;
        std::fs::write(dir.join("meta.json"), meta_bytes)?;

        db.registrar().inc_snapshots();

        if let Some(wal) = db.wal() {
            wal.truncate_before(txn)?;
        }

        Ok(txn)
    }

    /// Finds and loads the most recent complete snapshot under
    /// `snapshots_dir`, creating any table it mentions that `db` does not
    /// already have registered (recovering the schema and level plan
    /// from the snapshot's own metadata), loading every part into that
    /// table's live block, and resetting the transaction watermark.
    /// Returns the snapshot's txn, or `None` if no snapshot exists.
    pub fn load_latest(db: &Arc<Database>, snapshots_dir: &Path) -> Result<Option<u64>> {
        let Some(dir) = latest_snapshot_dir(snapshots_dir)? else { return Ok(None) };
        let meta_bytes = std::fs::read(dir.join("meta.json"))?;
        let meta: SnapshotMeta = serde_json::from_slice(&meta_bytes)?;

        for table_meta in &meta.tables {
            if db.table(&table_meta.name).is_err() {
                db.create_table(&table_meta.name, table_meta.schema.clone(), table_meta.level_max_size.len(), table_meta.level_max_size.clone())?;
            }
            let table_dir = dir.join(&table_meta.name);
            for part_meta in &table_meta.parts {
                let bytes = std::fs::read(table_dir.join(&part_meta.file))?;
                let buffer = crate::bridge::SerializedBuffer::from_bytes(&bytes)?;
                let part = Part::from_buffer(buffer, part_meta.txn_id, part_meta.size_bytes, part_meta.level);
                db.load_snapshot(meta.txn, &table_meta.name, part_meta.level, part);
            }
        }

        Ok(Some(meta.txn))
    }
}

fn dir_name(txn: u64) -> String {
    format!("{txn:020}")
}

fn latest_snapshot_dir(snapshots_dir: &Path) -> Result<Option<PathBuf>> {
    if !snapshots_dir.exists() {
        return Ok(None);
    }
    let mut candidates: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(snapshots_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !path.join("meta.json").exists() {
            continue;
        }
        if let Some(txn) = path.file_name().and_then(|n| n.to_str()).and_then(|n| n.parse::<u64>().ok()) {
            candidates.push((txn, path));
        }
    }
    candidates.sort_by_key(|(txn, _)| *txn);
    Ok(candidates.into_iter().next_back().map(|(_, path)| path))
}
