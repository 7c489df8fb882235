//! The active writable block of one table (spec.md §3 TableBlock, §4.4).
//!
//! A `TableBlock` owns one [`LSMIndex`] and accepts inserts until its
//! size crosses `active_block_size`, at which point [`Table`] rotates it
//! out for a fresh block and schedules the old one for persistence once
//! its outstanding compactions drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ulid::Ulid;

use crate::bridge::Record;
use crate::compaction::{Compactor, LevelPlan, WaitGroup};
use crate::error::Result;
use crate::lsm::LSMIndex;
use crate::metrics::Registrar;
use crate::part::Part;
use crate::schema::Schema;

/// One bounded, append-only unit of a table's history, identified by a
/// ULID that encodes the time the block was opened.
pub struct TableBlock {
    id: Ulid,
    schema: Arc<Schema>,
    lsm: Arc<LSMIndex>,
    plan: Arc<LevelPlan>,
    compactor: Arc<Compactor>,
    waitgroup: Arc<WaitGroup>,
    size_bytes: AtomicU64,
    active_block_size: u64,
}

impl TableBlock {
    pub fn new(schema: Arc<Schema>, plan: Arc<LevelPlan>, compactor: Arc<Compactor>, active_block_size: u64) -> Self {
        TableBlock {
            id: Ulid::new(),
            lsm: Arc::new(LSMIndex::new(plan.max_size.len())),
            schema,
            plan,
            compactor,
            waitgroup: Arc::new(WaitGroup::new()),
            size_bytes: AtomicU64::new(0),
            active_block_size,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn lsm(&self) -> &Arc<LSMIndex> {
        &self.lsm
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::SeqCst)
    }

    /// Inserts one already-committed record batch (spec.md §4.4
    /// `insert`). Returns `true` if the block has now crossed
    /// `active_block_size` and should be rotated by the caller — rotation
    /// itself requires swapping the table's live-block pointer, which is
    /// a `Table`-level operation, not a `TableBlock` one.
    pub fn insert(&self, txn_id: u64, record: Record, registrar: &Arc<dyn Registrar>) -> Result<bool> {
        if record.num_rows() == 0 {
            registrar.inc_zero_row_inserts();
            return Ok(false);
        }

        let size_bytes = record.size_bytes();
        let part = Part::from_record(record, txn_id, size_bytes, 0);
        let l0_over_budget = self.lsm.add_and_check_budget(0, part, self.plan.max_size[0]);
        let total = self.size_bytes.fetch_add(size_bytes, Ordering::SeqCst) + size_bytes;

        if l0_over_budget {
            self.compactor.schedule(self.lsm.clone(), self.schema.clone(), 0, self.plan.clone(), self.waitgroup.clone());
        }

        Ok(total >= self.active_block_size)
    }

    /// Every live part with `txn_id <= watermark`, across every level.
    pub fn scan(&self, watermark: u64) -> Vec<Part> {
        self.lsm.scan(watermark)
    }

    /// Waits for every compaction this block has scheduled to finish.
    /// Called before persisting a rotated block (spec.md §4.4 `rotate`).
    pub async fn wait_for_compactions(&self) {
        self.waitgroup.wait().await;
    }

    /// Concatenates every part's serialized-buffer bytes into one
    /// payload, the persisted-block layout of spec.md §6
    /// (`<bucket>/<table>/<ulid>/data.parquet`). Parts are ordered by
    /// level then by list position; level order does not imply a sort
    /// order across parts, only within one part's rows.
    pub fn to_persisted_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for level in 0..self.lsm.num_levels() {
            for part in self.lsm.level(level).scan() {
                let buffer = part.as_serialized_buffer();
                let bytes = buffer.to_bytes()?;
                out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
                out.extend_from_slice(&bytes);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ColumnData, ColumnValues};
    use crate::lsm::compactor::RecordMergeCompactor;
    use crate::metrics::NoopRegistrar;
    use crate::schema::{ColumnDef, SortColumn, StorageType};
    use std::collections::HashMap;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::parse(vec![ColumnDef::new("value", StorageType::Int64, false)], vec![SortColumn::asc("value")]).unwrap())
    }

    fn record(values: Vec<i64>) -> Record {
        let n = values.len();
        let mut columns = HashMap::new();
        columns.insert("value".to_string(), ColumnData { storage_type: StorageType::Int64, values: ColumnValues::Int64(values), nulls: vec![false; n] });
        Record::new((*schema()).clone(), n, columns).unwrap()
    }

    fn block(active_block_size: u64) -> TableBlock {
        let schema = schema();
        let plan = Arc::new(LevelPlan::uniform(3, Arc::new(RecordMergeCompactor), u64::MAX));
        let compactor = Compactor::new(2, Arc::new(NoopRegistrar));
        TableBlock::new(schema, plan, compactor, active_block_size)
    }

    #[test]
    fn zero_row_insert_is_a_noop_but_counted() {
        let block = block(1_000_000);
        let registrar: Arc<dyn Registrar> = Arc::new(NoopRegistrar);
        let rotate = block.insert(0, record(vec![]), &registrar).unwrap();
        assert!(!rotate);
        assert_eq!(block.size_bytes(), 0);
    }

    #[test]
    fn insert_accumulates_size_and_signals_rotation() {
        let block = block(10);
        let registrar: Arc<dyn Registrar> = Arc::new(NoopRegistrar);
        assert!(!block.insert(0, record(vec![1]), &registrar).unwrap());
        let rotate = block.insert(1, record(vec![2, 3, 4, 5]), &registrar).unwrap();
        assert!(rotate);
    }

    #[test]
    fn scan_filters_by_watermark() {
        let block = block(1_000_000);
        let registrar: Arc<dyn Registrar> = Arc::new(NoopRegistrar);
        block.insert(0, record(vec![1]), &registrar).unwrap();
        block.insert(5, record(vec![2]), &registrar).unwrap();
        assert_eq!(block.scan(0).len(), 1);
        assert_eq!(block.scan(5).len(), 2);
    }
}
