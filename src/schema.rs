//! Schema, dynamic columns, and the total orderings over `DynamicRow`s
//! that the LSM index and compactor rely on (spec §3, §4.1).
//!
//! A *dynamic* column is a declared prefix (e.g. `"labels"`); any label
//! `"labels.region"` discovered at insert time becomes a physical column
//! without a migration step. `Schema::unify` builds the superset schema
//! needed when a compaction or a query has to read rows produced under
//! differing dynamic-column shapes.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{FrostError, Result};

/// Physical storage type of a column. Binary/Utf8 sort lexicographically;
/// Int64/Float64 sort numerically; Bool sorts false < true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    Int64,
    Float64,
    Utf8,
    Bool,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

/// One column in a schema definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub storage_type: StorageType,
    pub nullable: bool,
    /// True if `name` is a prefix: any `"<name>.<suffix>"` column is
    /// materialized on demand rather than declared up front.
    pub dynamic: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, storage_type: StorageType, nullable: bool) -> Self {
        Self { name: name.into(), storage_type, nullable, dynamic: false }
    }

    pub fn dynamic_prefix(name: impl Into<String>, storage_type: StorageType) -> Self {
        Self { name: name.into(), storage_type, nullable: true, dynamic: true }
    }
}

/// One entry in a schema's sort order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortColumn {
    pub name: String,
    pub direction: SortDirection,
    pub nulls: NullsOrder,
}

impl SortColumn {
    pub fn asc(name: impl Into<String>) -> Self {
        Self { name: name.into(), direction: SortDirection::Ascending, nulls: NullsOrder::First }
    }
}

/// A self-contained schema: static + dynamic-prefix column declarations
/// plus the sort order `RowLessThan`/`Cmp` are defined over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
    pub sort_order: Vec<SortColumn>,
}

impl Schema {
    /// Parse and validate a schema definition.
    ///
    /// Errors: duplicate column names, a sort column referencing an
    /// unknown (non-dynamic-prefixed) column, or a sort column over a
    /// type that has no total order here (none currently — Binary sorts
    /// lexicographically — but the hook exists for future storage
    /// types).
    pub fn parse(columns: Vec<ColumnDef>, sort_order: Vec<SortColumn>) -> Result<Schema> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.clone()) {
                return Err(FrostError::DuplicateColumn(col.name.clone()));
            }
        }

        for sort_col in &sort_order {
            if !Self::resolves(&columns, &sort_col.name) {
                return Err(FrostError::UnknownColumn(sort_col.name.clone()));
            }
        }

        Ok(Schema { columns, sort_order })
    }

    fn resolves(columns: &[ColumnDef], name: &str) -> bool {
        columns.iter().any(|c| {
            if c.dynamic {
                name == c.name || name.starts_with(&format!("{}.", c.name))
            } else {
                name == c.name
            }
        })
    }

    pub fn static_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.dynamic)
    }

    pub fn dynamic_prefixes(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.dynamic)
    }

    fn storage_type_of(&self, name: &str) -> Option<StorageType> {
        self.columns.iter().find_map(|c| {
            if c.dynamic {
                if name.starts_with(&format!("{}.", c.name)) {
                    Some(c.storage_type)
                } else {
                    None
                }
            } else if c.name == name {
                Some(c.storage_type)
            } else {
                None
            }
        })
    }

    /// `Cmp` over `DynamicRow`s: considers only declared sort columns,
    /// resolving a missing value on either side as null per the
    /// column's nulls-first/last policy.
    pub fn cmp(&self, a: &DynamicRow, b: &DynamicRow) -> Ordering {
        for sort_col in &self.sort_order {
            let av = a.get(&sort_col.name);
            let bv = b.get(&sort_col.name);
            let ord = compare_scalars(av, bv, sort_col.nulls);
            let ord = match sort_col.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// `RowLessThan`: strict `cmp(a, b) == Less`.
    pub fn row_less_than(&self, a: &DynamicRow, b: &DynamicRow) -> bool {
        self.cmp(a, b) == Ordering::Less
    }

    /// Union of per-prefix suffix lists across several discovered
    /// dynamic-column shapes, stably sorted within each prefix (first
    /// appearance order is preserved; this is a union, not a re-sort).
    pub fn merge_dynamic_columns(suffix_sets: &[Vec<String>]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for set in suffix_sets {
            for suffix in set {
                if seen.insert(suffix.clone()) {
                    merged.push(suffix.clone());
                }
            }
        }
        merged
    }

    /// Build the superset schema capable of holding rows produced under
    /// any of `schemas`' dynamic-column shapes. Static columns must
    /// agree across inputs (by name); dynamic prefixes are unioned.
    pub fn unify(schemas: &[&Schema]) -> Result<Schema> {
        let Some(first) = schemas.first() else {
            return Err(FrostError::InvalidSchema("cannot unify zero schemas".into()));
        };

        let mut columns: Vec<ColumnDef> = first.static_columns().cloned().collect();
        let mut dynamic_prefixes: HashMap<String, (StorageType, Vec<Vec<String>>)> = HashMap::new();

        for schema in schemas {
            for prefix in schema.dynamic_prefixes() {
                dynamic_prefixes
                    .entry(prefix.name.clone())
                    .or_insert_with(|| (prefix.storage_type, Vec::new()));
            }
        }

        // Dynamic suffixes live on the rows, not the schema declaration,
        // so the schema-level unify only needs to agree on which
        // prefixes exist; suffix unification happens in
        // `RowGroupBuilder` (bridge.rs) where concrete rows are known.
        for (name, (storage_type, _)) in dynamic_prefixes {
            columns.push(ColumnDef::dynamic_prefix(name, storage_type));
        }

        Ok(Schema { columns, sort_order: first.sort_order.clone() })
    }

    pub fn column_storage_type(&self, name: &str) -> Option<StorageType> {
        self.storage_type_of(name)
    }
}

/// Scalar value held in one `DynamicRow` column slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Bool(bool),
    Binary(Vec<u8>),
}

impl ScalarValue {
    fn partial_cmp(&self, other: &ScalarValue) -> Ordering {
        match (self, other) {
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a.cmp(b),
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => a.cmp(b),
            (ScalarValue::Binary(a), ScalarValue::Binary(b)) => a.cmp(b),
            // Mixed types should not occur within one sort column; treat
            // as equal rather than panicking so a malformed row doesn't
            // bring down a compaction.
            _ => Ordering::Equal,
        }
    }
}

/// Compares two optional column values under a nulls-first/last policy.
/// A missing value (`None`) is treated identically to an explicit null.
fn compare_scalars(a: Option<&ScalarValue>, b: Option<&ScalarValue>, nulls: NullsOrder) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => match nulls {
            NullsOrder::First => Ordering::Less,
            NullsOrder::Last => Ordering::Greater,
        },
        (Some(_), None) => match nulls {
            NullsOrder::First => Ordering::Greater,
            NullsOrder::Last => Ordering::Less,
        },
        (Some(a), Some(b)) => a.partial_cmp(b),
    }
}

/// A tuple of (values, presence) for the dynamic columns present on one
/// row. Identity is for comparison only — this type is never stored, it
/// is derived from a `Record`/`SerializedBuffer` row to feed `Schema::cmp`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicRow {
    values: HashMap<String, ScalarValue>,
}

impl DynamicRow {
    pub fn new(values: HashMap<String, ScalarValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.values.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}
