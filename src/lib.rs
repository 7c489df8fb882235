#![allow(dead_code)]
//! FrostDB storage core
//!
//! An embeddable columnar storage engine: the write path, the LSM index
//! and its background compactor, the write-ahead log, crash recovery,
//! and the point-in-time snapshot/restore cycle. Query planning,
//! execution, and the wire protocol are out of scope here — this crate
//! exposes the pieces a query engine sits on top of: [`Table::scan`],
//! [`iterator::iterator`], and [`iterator::arrow_schema`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Database                                 │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                │
//! │  │   Table    │   │   Table    │   │   Table    │   ...          │
//! │  │ ┌────────┐ │   │ ┌────────┐ │   │ ┌────────┐ │                │
//! │  │ │ live   │ │   │ │ live   │ │   │ │ live   │ │  TableBlock    │
//! │  │ │ block  │ │   │ │ block  │ │   │ │ block  │ │  = LSMIndex    │
//! │  │ └───┬────┘ │   │ └───┬────┘ │   │ └───┬────┘ │  + Compactor   │
//! │  │  rotated … │   │  rotated … │   │  rotated … │                │
//! │  └────────────┘   └────────────┘   └────────────┘                │
//! │         ▲                                                         │
//! │         │ insert(table, record)                                  │
//! │  ┌──────┴──────┐       ┌────────────┐       ┌───────────────┐    │
//! │  │   TxnMgr    │       │     WAL    │       │   Snapshot     │    │
//! │  │ (watermark) │◄─────►│ (segments) │◄─────►│ (meta.json)    │    │
//! │  └─────────────┘       └────────────┘       └───────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod block;
pub mod bridge;
pub mod cancellation;
pub mod compaction;
pub mod config;
pub mod db;
pub mod error;
pub mod iterator;
pub mod lsm;
pub mod metrics;
pub mod part;
pub mod schema;
pub mod snapshot;
pub mod txn;
pub mod wal;

pub use bridge::{ColumnCodec, ColumnData, ColumnValues, Record, ReferenceCodec, RowGroup, SerializedBuffer};
pub use cancellation::CancellationToken;
pub use compaction::{Compactor, LevelPlan, WaitGroup};
pub use config::{Bucket, Compression, Config, NullBucket, WalConfig};
pub use db::{Database, Table};
pub use error::{FrostError, Result};
pub use iterator::{arrow_schema, iterator, schema_iterator, view, IteratorOptions};
pub use lsm::LSMIndex;
pub use metrics::{prometheus_registrar, NoopRegistrar, PrometheusRegistrar, Registrar};
pub use part::Part;
pub use schema::{ColumnDef, DynamicRow, NullsOrder, ScalarValue, Schema, SortColumn, SortDirection, StorageType};
pub use snapshot::Snapshot;
pub use txn::TxnMgr;
pub use wal::Wal;
