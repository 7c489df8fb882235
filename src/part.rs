//! `Part`: the unit the LSM index and compactor operate on (spec.md §4.2).
//!
//! A part is either a `Record` still resident in memory (written by an
//! active `TableBlock`) or a `SerializedBuffer` that has been flushed to
//! its file-format representation (produced by compaction or replay from
//! a snapshot). Both variants are immutable once constructed and
//! reference-counted: the LSM index holds the logical owner, readers and
//! the compactor retain a handle for the duration of a scan or merge and
//! release it afterwards.

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::bridge::{Record, SerializedBuffer};
use crate::schema::{DynamicRow, Schema};

#[derive(Clone)]
enum PartData {
    Record(Record),
    Buffer(SerializedBuffer),
}

struct PartInner {
    data: PartData,
    txn_id: u64,
    size_bytes: u64,
    num_rows: usize,
    level: AtomicUsize,
    least: OnceCell<DynamicRow>,
    most: OnceCell<DynamicRow>,
}

/// Immutable, reference-counted handle to one part's data plus the
/// metadata the index and compactor need without touching the rows:
/// `txn_id` (commit order), `size_bytes` (compaction bin-packing),
/// cached `least`/`most` keys (interval-overlap tests), and mutable
/// `level` (which LSM level currently owns it).
#[derive(Clone)]
pub struct Part(Arc<PartInner>);

impl Part {
    pub fn from_record(record: Record, txn_id: u64, size_bytes: u64, level: usize) -> Self {
        let num_rows = record.num_rows();
        Part(Arc::new(PartInner {
            data: PartData::Record(record),
            txn_id,
            size_bytes,
            num_rows,
            level: AtomicUsize::new(level),
            least: OnceCell::new(),
            most: OnceCell::new(),
        }))
    }

    pub fn from_buffer(buffer: SerializedBuffer, txn_id: u64, size_bytes: u64, level: usize) -> Self {
        let num_rows = buffer.num_rows();
        Part(Arc::new(PartInner {
            data: PartData::Buffer(buffer),
            txn_id,
            size_bytes,
            num_rows,
            level: AtomicUsize::new(level),
            least: OnceCell::new(),
            most: OnceCell::new(),
        }))
    }

    pub fn txn_id(&self) -> u64 {
        self.0.txn_id
    }

    pub fn size_bytes(&self) -> u64 {
        self.0.size_bytes
    }

    pub fn num_rows(&self) -> usize {
        self.0.num_rows
    }

    pub fn level(&self) -> usize {
        self.0.level.load(AtomicOrdering::SeqCst)
    }

    pub fn set_level(&self, level: usize) {
        self.0.level.store(level, AtomicOrdering::SeqCst);
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.0.data, PartData::Buffer(_))
    }

    /// Force this part into its serialized-buffer representation,
    /// encoding an in-memory `Record` if needed. Called before a part is
    /// handed to the compactor or persisted in a rotated block.
    pub fn as_serialized_buffer(&self) -> SerializedBuffer {
        match &self.0.data {
            PartData::Buffer(buf) => buf.retain(),
            PartData::Record(record) => SerializedBuffer::from_record(record.retain()),
        }
    }

    fn rows(&self) -> Vec<DynamicRow> {
        match &self.0.data {
            PartData::Record(record) => (0..record.num_rows()).map(|i| record.row(i)).collect(),
            PartData::Buffer(buf) => buf.rowgroups().flat_map(|rg| (0..rg.num_rows()).map(|i| rg.row(i)).collect::<Vec<_>>()).collect(),
        }
    }

    /// The row that sorts first under `schema`, computed lazily and cached.
    pub fn least(&self, schema: &Schema) -> Option<DynamicRow> {
        if self.0.num_rows == 0 {
            return None;
        }
        Some(
            self.0
                .least
                .get_or_init(|| {
                    let mut rows = self.rows();
                    rows.sort_by(|a, b| schema.cmp(a, b));
                    rows.into_iter().next().expect("num_rows > 0")
                })
                .clone(),
        )
    }

    /// The row that sorts last under `schema`, computed lazily and cached.
    pub fn most(&self, schema: &Schema) -> Option<DynamicRow> {
        if self.0.num_rows == 0 {
            return None;
        }
        Some(
            self.0
                .most
                .get_or_init(|| {
                    let mut rows = self.rows();
                    rows.sort_by(|a, b| schema.cmp(a, b));
                    rows.into_iter().next_back().expect("num_rows > 0")
                })
                .clone(),
        )
    }

    /// Whether this part's key range can intersect `other`'s. A `false`
    /// result is conclusive (the compactor can skip the pair); a `true`
    /// result means the ranges merely overlap, not that rows collide.
    pub fn overlaps_with(&self, other: &Part, schema: &Schema) -> bool {
        let (Some(a_least), Some(a_most)) = (self.least(schema), self.most(schema)) else {
            return false;
        };
        let (Some(b_least), Some(b_most)) = (other.least(schema), other.most(schema)) else {
            return false;
        };
        schema.cmp(&a_least, &b_most) != std::cmp::Ordering::Greater
            && schema.cmp(&b_least, &a_most) != std::cmp::Ordering::Greater
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Identity comparison: true iff `self` and `other` are handles to
    /// the same underlying part. Used by the LSM level list to locate a
    /// node by the `Part` a caller already holds, rather than by value
    /// equality (two parts can legitimately hold equal rows).
    pub fn ptr_eq(&self, other: &Part) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Explicit release, matching the ownership contract described in
    /// spec.md §9; dropping the handle already does this.
    pub fn release(self) {
        drop(self)
    }
}
