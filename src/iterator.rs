//! The read-side surface consumed by an external query engine (spec.md
//! §6 "Iterator interface"). This crate does not execute queries; it
//! only hands back rowgroup views filtered to a stable watermark and an
//! optional predicate/projection, leaving aggregation and planning to
//! the caller.

use std::sync::Arc;

use crate::bridge::{ColumnData, RowGroup};
use crate::db::{Database, Table};
use crate::error::Result;
use crate::schema::{DynamicRow, Schema};

/// Filter and shape applied while iterating a table's parts.
#[derive(Default)]
pub struct IteratorOptions {
    /// Row-level predicate, evaluated against the row's dynamic view.
    pub filter: Option<Arc<dyn Fn(&DynamicRow) -> bool + Send + Sync>>,
    /// Column names the caller wants materialized; `None` means every
    /// column the underlying rowgroup carries.
    pub projection: Option<Vec<String>>,
    /// Column names to read off disk even if not in `projection` (e.g.
    /// sort-key columns a downstream merge step still needs).
    pub physical_projection: Option<Vec<String>>,
    /// When set, only the first row observed for each distinct tuple of
    /// these columns' values is yielded per rowgroup.
    pub distinct_columns: Option<Vec<String>>,
}

impl IteratorOptions {
    pub fn all() -> Self {
        Self::default()
    }

    fn read_columns(&self) -> Option<Vec<String>> {
        match (&self.projection, &self.physical_projection) {
            (None, None) => None,
            (proj, phys) => {
                let mut names: Vec<String> = proj.clone().unwrap_or_default();
                if let Some(phys) = phys {
                    for name in phys {
                        if !names.contains(name) {
                            names.push(name.clone());
                        }
                    }
                }
                Some(names)
            }
        }
    }
}

/// A rowgroup view restricted to a column subset and, optionally, a
/// distinct-columns dedup pass. Built lazily from an underlying
/// [`RowGroup`] so projection never forces a copy of unselected columns.
struct ProjectedRowGroup {
    inner: Box<dyn RowGroup>,
    columns: Vec<String>,
    visible_rows: Vec<usize>,
}

impl ProjectedRowGroup {
    fn build(inner: Box<dyn RowGroup>, opts: &IteratorOptions) -> Option<Self> {
        let columns = match opts.read_columns() {
            Some(cols) => cols,
            None => inner.column_names(),
        };

        let mut visible_rows = Vec::new();
        let mut seen_distinct: Vec<DynamicRow> = Vec::new();
        for i in 0..inner.num_rows() {
            let row = inner.row(i);
            if let Some(filter) = &opts.filter {
                if !filter(&row) {
                    continue;
                }
            }
            if let Some(distinct_cols) = &opts.distinct_columns {
                let key: Vec<Option<&crate::schema::ScalarValue>> = distinct_cols.iter().map(|c| row.get(c)).collect();
                let dup = seen_distinct.iter().any(|seen| {
                    distinct_cols.iter().map(|c| seen.get(c)).collect::<Vec<_>>() == key
                });
                if dup {
                    continue;
                }
                seen_distinct.push(row);
            }
            visible_rows.push(i);
        }

        if visible_rows.is_empty() {
            return None;
        }
        Some(ProjectedRowGroup { inner, columns, visible_rows })
    }
}

impl RowGroup for ProjectedRowGroup {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn num_rows(&self) -> usize {
        self.visible_rows.len()
    }

    fn column(&self, name: &str) -> Option<&ColumnData> {
        if self.columns.iter().any(|c| c == name) {
            self.inner.column(name)
        } else {
            None
        }
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn row(&self, index: usize) -> DynamicRow {
        self.inner.row(self.visible_rows[index])
    }
}

/// Runs `f` with a watermark pinned for its duration. Reads inside `f`
/// that pass this watermark to [`iterator`]/[`schema_iterator`] observe
/// a consistent snapshot even if concurrent writers commit meanwhile.
pub fn view<R>(db: &Arc<Database>, f: impl FnOnce(u64) -> R) -> R {
    f(db.begin_read())
}

/// Yields every rowgroup across `table`'s parts with `txn_id <= watermark`
/// that has at least one row surviving `opts.filter`/`opts.distinct_columns`,
/// shaped to `opts.projection`/`opts.physical_projection`. `callback`
/// returning `Err` aborts iteration and propagates the error.
pub fn iterator(
    table: &Table,
    watermark: u64,
    opts: &IteratorOptions,
    mut callback: impl FnMut(Box<dyn RowGroup>) -> Result<()>,
) -> Result<()> {
    for part in table.scan(watermark) {
        let buffer = part.as_serialized_buffer();
        for rg in buffer.rowgroups() {
            if let Some(projected) = ProjectedRowGroup::build(rg, opts) {
                callback(Box::new(projected))?;
            }
        }
    }
    Ok(())
}

/// Same traversal as [`iterator`], but hands back only each surviving
/// rowgroup's column names rather than materializing row data.
pub fn schema_iterator(
    table: &Table,
    watermark: u64,
    opts: &IteratorOptions,
    mut callback: impl FnMut(Vec<String>) -> Result<()>,
) -> Result<()> {
    iterator(table, watermark, opts, |rg| callback(rg.column_names()))
}

/// The unified record schema a query against `table` at `watermark`
/// would observe: the table's declared schema, restricted to
/// `opts.projection` when present. Dynamic-column suffixes actually
/// present at `watermark` are not reflected here (this crate's `Schema`
/// only models declared prefixes) — a caller needing the per-insert
/// suffix set should read it off the rowgroups via `schema_iterator`.
pub fn arrow_schema(table: &Table, opts: &IteratorOptions) -> Schema {
    let schema = table.schema();
    match &opts.projection {
        None => (**schema).clone(),
        Some(projection) => {
            let columns = schema
                .columns
                .iter()
                .filter(|c| projection.iter().any(|p| p == &c.name || (c.dynamic && p.starts_with(&format!("{}.", c.name)))))
                .cloned()
                .collect();
            Schema { columns, sort_order: schema.sort_order.clone() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ColumnData, ColumnValues, Record};
    use crate::cancellation::CancellationToken;
    use crate::config::{Compression, Config, NullBucket, WalConfig};
    use crate::metrics::NoopRegistrar;
    use crate::schema::{ColumnDef, ScalarValue, SortColumn, StorageType};
    use std::collections::HashMap;

    fn schema() -> Schema {
        Schema::parse(vec![ColumnDef::new("value", StorageType::Int64, false)], vec![SortColumn::asc("value")]).unwrap()
    }

    fn record(values: Vec<i64>) -> Record {
        let n = values.len();
        let mut columns = HashMap::new();
        columns.insert("value".to_string(), ColumnData { storage_type: StorageType::Int64, values: ColumnValues::Int64(values), nulls: vec![false; n] });
        Record::new(schema(), n, columns).unwrap()
    }

    fn test_db() -> (Arc<Database>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_path: dir.path().to_path_buf(),
            bucket: Arc::new(NullBucket),
            wal: WalConfig { enabled: false, dir: None, max_segment_bytes: 1024, batch_interval_ms: 50, compression: Compression::None },
            snapshot_trigger_size: u64::MAX,
            active_block_size: u64::MAX,
            granule_size: 1024,
            split_size: 2,
            index_degree: 8,
            ignore_storage_on_query: false,
            registrar: Arc::new(NoopRegistrar),
        };
        let db = Database::open(config).unwrap();
        (db, dir)
    }

    #[test]
    fn iterator_applies_filter_and_yields_matching_rows_only() {
        let (db, _dir) = test_db();
        db.create_table("events", schema(), 2, vec![1_000_000; 2]).unwrap();
        let cancel = CancellationToken::new();
        db.insert("events", record(vec![1, 2, 3]), &cancel).unwrap();

        let table = db.table("events").unwrap();
        let watermark = db.begin_read();
        let opts = IteratorOptions { filter: Some(Arc::new(|row: &DynamicRow| matches!(row.get("value"), Some(ScalarValue::Int64(v)) if *v >= 2))), ..IteratorOptions::all() };

        let mut seen = 0;
        iterator(&table, watermark, &opts, |rg| {
            seen += rg.num_rows();
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn schema_iterator_reports_projected_columns() {
        let (db, _dir) = test_db();
        db.create_table("events", schema(), 2, vec![1_000_000; 2]).unwrap();
        let cancel = CancellationToken::new();
        db.insert("events", record(vec![1]), &cancel).unwrap();

        let table = db.table("events").unwrap();
        let watermark = db.begin_read();
        let opts = IteratorOptions { projection: Some(vec!["value".to_string()]), ..IteratorOptions::all() };

        let mut columns = Vec::new();
        schema_iterator(&table, watermark, &opts, |cols| {
            columns = cols;
            Ok(())
        })
        .unwrap();
        assert_eq!(columns, vec!["value".to_string()]);
    }

    #[test]
    fn arrow_schema_with_no_projection_returns_full_schema() {
        let (db, _dir) = test_db();
        db.create_table("events", schema(), 2, vec![1_000_000; 2]).unwrap();
        let table = db.table("events").unwrap();
        let result = arrow_schema(&table, &IteratorOptions::all());
        assert_eq!(result.columns.len(), 1);
    }
}
