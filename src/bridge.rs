//! The in-memory columnar format (Arrow-like `Record`) and the
//! self-contained file format (Parquet-like `SerializedBuffer`), plus the
//! conversions between them.
//!
//! Real Arrow/Parquet crates are out of scope (spec.md §1): this module
//! only implements the capabilities the storage core requires — a
//! columnar batch with null bitmaps, a rowgroup abstraction the query
//! engine's iterator contract consumes (§6), and a byte-exact encode/decode
//! pair sufficient to round-trip through the WAL and rotated blocks. An
//! embedder wanting the real formats swaps the `ColumnCodec` impl.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FrostError, Result};
use crate::schema::{DynamicRow, Schema, ScalarValue, StorageType};

/// One column's values plus an explicit null bitmap (`true` = null at
/// that row index; the stored value at a null index is a type default
/// and must not be read).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnData {
    pub storage_type: StorageType,
    pub values: ColumnValues,
    pub nulls: Vec<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColumnValues {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Bool(Vec<bool>),
    Binary(Vec<Vec<u8>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        self.nulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nulls.is_empty()
    }

    /// Crude in-memory size estimate; this crate carries no real
    /// Parquet-like encoder to measure an actual encoded size against
    /// (spec.md §1 scopes the file format out), so `Part::size_bytes`
    /// and `TableBlock` rotation accounting are driven by this instead.
    pub fn size_bytes(&self) -> u64 {
        let payload = match &self.values {
            ColumnValues::Int64(v) => (v.len() * 8) as u64,
            ColumnValues::Float64(v) => (v.len() * 8) as u64,
            ColumnValues::Utf8(v) => v.iter().map(|s| s.len() as u64).sum(),
            ColumnValues::Bool(v) => v.len() as u64,
            ColumnValues::Binary(v) => v.iter().map(|b| b.len() as u64).sum(),
        };
        payload + self.nulls.len() as u64
    }

    pub fn get(&self, row: usize) -> Option<ScalarValue> {
        if self.nulls.get(row).copied().unwrap_or(true) {
            return None;
        }
        Some(match &self.values {
            ColumnValues::Int64(v) => ScalarValue::Int64(v[row]),
            ColumnValues::Float64(v) => ScalarValue::Float64(v[row]),
            ColumnValues::Utf8(v) => ScalarValue::Utf8(v[row].clone()),
            ColumnValues::Bool(v) => ScalarValue::Bool(v[row]),
            ColumnValues::Binary(v) => ScalarValue::Binary(v[row].clone()),
        })
    }
}

/// A columnar batch of N rows x K columns, reference-counted. One
/// logical owner holds the `Record`; additional readers clone the
/// handle (an `Arc` bump) and must call [`Record::release`] (a no-op
/// beyond dropping the clone) when done, matching the Part ownership
/// contract in spec.md §4.2.
#[derive(Clone)]
pub struct Record(Arc<RecordInner>);

struct RecordInner {
    schema: Schema,
    num_rows: usize,
    columns: HashMap<String, ColumnData>,
}

impl Record {
    pub fn new(schema: Schema, num_rows: usize, columns: HashMap<String, ColumnData>) -> Result<Self> {
        for (name, col) in &columns {
            if col.len() != num_rows {
                return Err(FrostError::Encoding(format!(
                    "column {name} has {} rows, expected {num_rows}",
                    col.len()
                )));
            }
        }
        Ok(Record(Arc::new(RecordInner { schema, num_rows, columns })))
    }

    pub fn schema(&self) -> &Schema {
        &self.0.schema
    }

    pub fn num_rows(&self) -> usize {
        self.0.num_rows
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.0.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &String> {
        self.0.columns.keys()
    }

    pub fn row(&self, index: usize) -> DynamicRow {
        let mut values = HashMap::new();
        for (name, col) in &self.0.columns {
            if let Some(v) = col.get(index) {
                values.insert(name.clone(), v);
            }
        }
        DynamicRow::new(values)
    }

    /// Explicit retain, matching the Part refcounting contract (spec.md
    /// §9); under the hood this is an `Arc` clone.
    pub fn retain(&self) -> Record {
        self.clone()
    }

    /// Explicit release; dropping the handle is sufficient, this exists
    /// so call sites read the same way as the spec's contract.
    pub fn release(self) {
        drop(self)
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Sum of every column's size estimate; used as `Part::size_bytes`
    /// for a freshly inserted or freshly merged record (spec.md §4.4).
    pub fn size_bytes(&self) -> u64 {
        self.0.columns.values().map(|c| c.size_bytes()).sum::<u64>().max(1)
    }
}

/// One rowgroup inside a [`SerializedBuffer`]: exposes columns by name
/// and yields rows in the buffer's declared sort order. This is the
/// exact surface the external query engine's iterator contract (§6)
/// consumes.
pub trait RowGroup: Send + Sync {
    fn schema(&self) -> &Schema;
    fn num_rows(&self) -> usize;
    fn column(&self, name: &str) -> Option<&ColumnData>;
    fn column_names(&self) -> Vec<String>;
    fn row(&self, index: usize) -> DynamicRow;
}

struct RecordRowGroup(Record);

impl RowGroup for RecordRowGroup {
    fn schema(&self) -> &Schema {
        self.0.schema()
    }

    fn num_rows(&self) -> usize {
        self.0.num_rows()
    }

    fn column(&self, name: &str) -> Option<&ColumnData> {
        self.0.column(name)
    }

    fn column_names(&self) -> Vec<String> {
        self.0.column_names().cloned().collect()
    }

    fn row(&self, index: usize) -> DynamicRow {
        self.0.row(index)
    }
}

/// A self-contained file-format representation of one or more rowgroups,
/// reference-counted like [`Record`].
#[derive(Clone)]
pub struct SerializedBuffer(Arc<SerializedBufferInner>);

struct SerializedBufferInner {
    rowgroups: Vec<Record>,
}

impl SerializedBuffer {
    pub fn from_record(record: Record) -> Self {
        SerializedBuffer(Arc::new(SerializedBufferInner { rowgroups: vec![record] }))
    }

    pub fn from_rowgroups(rowgroups: Vec<Record>) -> Self {
        SerializedBuffer(Arc::new(SerializedBufferInner { rowgroups }))
    }

    pub fn rowgroups(&self) -> impl Iterator<Item = Box<dyn RowGroup + '_>> + '_ {
        self.0.rowgroups.iter().map(|r| Box::new(RecordRowGroup(r.clone())) as Box<dyn RowGroup>)
    }

    pub fn num_rows(&self) -> usize {
        self.0.rowgroups.iter().map(|r| r.num_rows()).sum()
    }

    pub fn size_bytes(&self) -> u64 {
        self.0.rowgroups.iter().map(|r| r.size_bytes()).sum::<u64>().max(1)
    }

    /// The first rowgroup as a concrete `Record`, when this buffer wraps
    /// exactly the in-memory shape produced by `from_record`/`from_rowgroups`
    /// with a single rowgroup. Used by WAL replay, which needs back the
    /// original record rather than the generic `RowGroup` view.
    pub fn first_record(&self) -> Option<Record> {
        self.0.rowgroups.first().cloned()
    }

    pub fn retain(&self) -> SerializedBuffer {
        self.clone()
    }

    pub fn release(self) {
        drop(self)
    }

    /// Encode to bytes using the reference [`ColumnCodec`]. Used for the
    /// rotated-block persisted payload and the snapshot's part bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        ReferenceCodec.encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ReferenceCodec.decode(bytes)
    }
}

/// Streaming encoder/decoder pair for one dynamic-column shape, handed
/// back by `Schema::writer`/`Schema::reader` equivalents. A production
/// embedder swaps `ReferenceCodec` for real Arrow IPC / Parquet writers;
/// the storage core only depends on this trait.
pub trait ColumnCodec: Send + Sync {
    fn encode(&self, buffer: &SerializedBuffer) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<SerializedBuffer>;
}

/// bincode-backed reference implementation. Self-describing (carries
/// the schema), so `decode` needs no external shape hint.
pub struct ReferenceCodec;

#[derive(Serialize, Deserialize)]
struct WireRowGroup {
    schema: Schema,
    num_rows: usize,
    columns: HashMap<String, ColumnData>,
}

#[derive(Serialize, Deserialize)]
struct WireBuffer {
    rowgroups: Vec<WireRowGroup>,
}

impl ColumnCodec for ReferenceCodec {
    fn encode(&self, buffer: &SerializedBuffer) -> Result<Vec<u8>> {
        let wire = WireBuffer {
            rowgroups: buffer
                .0
                .rowgroups
                .iter()
                .map(|r| WireRowGroup {
                    schema: r.schema().clone(),
                    num_rows: r.num_rows(),
                    columns: r.column_names().map(|n| (n.clone(), r.column(n).unwrap().clone())).collect(),
                })
                .collect(),
        };
        Ok(bincode::serialize(&wire)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<SerializedBuffer> {
        let wire: WireBuffer = bincode::deserialize(bytes)?;
        let mut rowgroups = Vec::with_capacity(wire.rowgroups.len());
        for rg in wire.rowgroups {
            rowgroups.push(Record::new(rg.schema, rg.num_rows, rg.columns)?);
        }
        Ok(SerializedBuffer::from_rowgroups(rowgroups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, SortColumn};

    fn schema() -> Schema {
        Schema::parse(vec![ColumnDef::new("value", StorageType::Int64, false)], vec![SortColumn::asc("value")])
            .unwrap()
    }

    fn sample_record() -> Record {
        let mut columns = HashMap::new();
        columns.insert(
            "value".to_string(),
            ColumnData { storage_type: StorageType::Int64, values: ColumnValues::Int64(vec![1, 2, 3]), nulls: vec![false; 3] },
        );
        Record::new(schema(), 3, columns).unwrap()
    }

    #[test]
    fn round_trips_through_reference_codec() {
        let record = sample_record();
        let buffer = SerializedBuffer::from_record(record);
        let bytes = buffer.to_bytes().unwrap();
        let decoded = SerializedBuffer::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.num_rows(), 3);
        let rg = decoded.rowgroups().next().unwrap();
        assert_eq!(rg.row(1).get("value"), Some(&ScalarValue::Int64(2)));
    }

    #[test]
    fn release_drops_without_panicking() {
        let record = sample_record();
        let retained = record.retain();
        record.release();
        assert_eq!(retained.num_rows(), 3);
    }
}
