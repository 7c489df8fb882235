//! Per-level merge (spec.md §4.3 "Merge at level k") and the compactor
//! function capability object it delegates to.
//!
//! A compactor function is supplied per level at configuration time
//! rather than selected from a type hierarchy, so passthrough, recordwise
//! sort-merge, and (eventually) file-format merge strategies compose
//! uniformly (spec.md §9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::{ColumnData, ColumnValues, Record};
use crate::error::{FrostError, Result};
use crate::metrics::Registrar;
use crate::part::Part;
use crate::schema::Schema;

use super::merge;
use super::LSMIndex;

/// Bytes read and written by one compactor invocation, surfaced through
/// [`Registrar::observe_compaction_bytes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionStats {
    pub input_bytes: u64,
    pub output_bytes: u64,
}

/// A compaction strategy for one level: takes the overlapping subset
/// selected by [`merge::partition`] and returns a single merged part.
pub trait CompactFn: Send + Sync {
    fn compact(&self, parts: &[Part], schema: &Schema, level: usize) -> Result<(Part, CompactionStats)>;
}

/// Sort-merges rows from every input part by `schema.cmp`, materializing
/// a single new `RecordPart`. This is the reference in-crate strategy;
/// an embedder with the real Parquet format would instead merge
/// `SerializedBuffer`s without fully materializing rows in memory.
pub struct RecordMergeCompactor;

impl CompactFn for RecordMergeCompactor {
    fn compact(&self, parts: &[Part], schema: &Schema, level: usize) -> Result<(Part, CompactionStats)> {
        if parts.is_empty() {
            return Err(FrostError::CompactionAborted { level, reason: "empty input set".into() });
        }

        let input_bytes: u64 = parts.iter().map(|p| p.size_bytes()).sum();
        let max_txn = parts.iter().map(|p| p.txn_id()).max().expect("non-empty");

        let mut rows: Vec<crate::schema::DynamicRow> = Vec::new();
        for part in parts {
            let buffer = part.as_serialized_buffer();
            for rg in buffer.rowgroups() {
                for i in 0..rg.num_rows() {
                    rows.push(rg.row(i));
                }
            }
        }
        rows.sort_by(|a, b| schema.cmp(a, b));

        let num_rows = rows.len();
        let mut columns: HashMap<String, ColumnData> = HashMap::new();
        for col in &schema.columns {
            if col.dynamic {
                continue; // dynamic suffixes are materialized by name below, not by prefix
            }
            columns.insert(col.name.clone(), empty_column(col.storage_type));
        }
        // Discover every concrete dynamic column actually present across rows.
        let mut dynamic_names: Vec<String> = Vec::new();
        for row in &rows {
            for name in row.columns() {
                if !columns.contains_key(name) && !dynamic_names.contains(name) {
                    dynamic_names.push(name.clone());
                }
            }
        }
        for name in &dynamic_names {
            let storage_type = schema.column_storage_type(name).unwrap_or(crate::schema::StorageType::Utf8);
            columns.insert(name.clone(), empty_column(storage_type));
        }

        for row in &rows {
            for (name, col) in columns.iter_mut() {
                push_scalar(col, row.get(name));
            }
        }

        let record = Record::new(schema.clone(), num_rows, columns)?;
        let output_bytes = record.size_bytes();
        let merged = Part::from_record(record, max_txn, output_bytes, level + 1);

        Ok((merged, CompactionStats { input_bytes, output_bytes }))
    }
}

fn empty_column(storage_type: crate::schema::StorageType) -> ColumnData {
    use crate::schema::StorageType::*;
    let values = match storage_type {
        Int64 => ColumnValues::Int64(Vec::new()),
        Float64 => ColumnValues::Float64(Vec::new()),
        Utf8 => ColumnValues::Utf8(Vec::new()),
        Bool => ColumnValues::Bool(Vec::new()),
        Binary => ColumnValues::Binary(Vec::new()),
    };
    ColumnData { storage_type, values, nulls: Vec::new() }
}

fn push_scalar(col: &mut ColumnData, value: Option<&crate::schema::ScalarValue>) {
    use crate::schema::ScalarValue as SV;
    match (&mut col.values, value) {
        (ColumnValues::Int64(v), Some(SV::Int64(x))) => v.push(*x),
        (ColumnValues::Int64(v), _) => v.push(0),
        (ColumnValues::Float64(v), Some(SV::Float64(x))) => v.push(*x),
        (ColumnValues::Float64(v), _) => v.push(0.0),
        (ColumnValues::Utf8(v), Some(SV::Utf8(x))) => v.push(x.clone()),
        (ColumnValues::Utf8(v), _) => v.push(String::new()),
        (ColumnValues::Bool(v), Some(SV::Bool(x))) => v.push(*x),
        (ColumnValues::Bool(v), _) => v.push(false),
        (ColumnValues::Binary(v), Some(SV::Binary(x))) => v.push(x.clone()),
        (ColumnValues::Binary(v), _) => v.push(Vec::new()),
    }
    col.nulls.push(value.is_none());
}

/// Outcome of one `merge_level` call, used by the caller to decide
/// whether to cascade into `level + 1`.
#[derive(Debug, Clone, Copy)]
pub struct MergeOutcome {
    pub ran: bool,
    pub next_level_over_budget: bool,
}

/// Runs one merge pass at `level` per spec.md §4.3 steps 1-7: publish the
/// level's Compacting sentinel, snapshot the level, partition it into a
/// non-overlapping and overlapping subset, compact the latter, and
/// splice the promoted union into `level + 1`.
///
/// A losing race against another in-flight merge of the same level (the
/// sentinel CAS fails) and an empty input set both return
/// `ran: false` without error. A compactor failure bumps the aborted
/// counter and also returns `ran: false`, leaving level `level`
/// untouched for a later retry.
pub fn merge_level(
    lsm: &LSMIndex,
    level: usize,
    schema: &Schema,
    compactor: &dyn CompactFn,
    level_max_size: &[u64],
    registrar: &Arc<dyn Registrar>,
) -> Result<MergeOutcome> {
    if level + 1 >= lsm.num_levels() {
        // Ln never compacts further.
        return Ok(MergeOutcome { ran: false, next_level_over_budget: false });
    }

    if !lsm.level(level).try_begin_compaction() {
        return Ok(MergeOutcome { ran: false, next_level_over_budget: false });
    }

    let outcome = run_merge(lsm, level, schema, compactor, level_max_size, registrar);
    // `run_merge` itself calls `commit_compaction` on every path that
    // actually ran; every other path (empty input, compactor failure)
    // still holds the marker it published above and must retract it.
    if !matches!(outcome, Ok(MergeOutcome { ran: true, .. })) {
        lsm.level(level).abort_compaction();
    }
    outcome
}

fn run_merge(
    lsm: &LSMIndex,
    level: usize,
    schema: &Schema,
    compactor: &dyn CompactFn,
    level_max_size: &[u64],
    registrar: &Arc<dyn Registrar>,
) -> Result<MergeOutcome> {
    let input = lsm.level(level).snapshot_below_sentinel();
    if input.is_empty() {
        return Ok(MergeOutcome { ran: false, next_level_over_budget: false });
    }

    let (non_overlap, overlap) = merge::partition(&input, schema);

    let merged_part = if overlap.is_empty() {
        None
    } else {
        match compactor.compact(&overlap, schema, level) {
            Ok((part, stats)) => {
                registrar.observe_compaction_bytes(stats.input_bytes, stats.output_bytes);
                Some(part)
            }
            Err(err) => {
                tracing::warn!(level, error = %err, "compaction aborted");
                registrar.inc_compactions_aborted(level);
                return Ok(MergeOutcome { ran: false, next_level_over_budget: false });
            }
        }
    };

    // Excise the entire snapshot from `level`; promoted parts land
    // individually in `level + 1` rather than being re-spliced here.
    lsm.level(level).commit_compaction(&input);

    for part in non_overlap {
        lsm.add(level + 1, part);
    }
    if let Some(part) = merged_part {
        lsm.add(level + 1, part);
    }

    let next_over_budget = lsm.level(level + 1).size_bytes() >= level_max_size[level + 1];
    Ok(MergeOutcome { ran: true, next_level_over_budget: next_over_budget })
}
