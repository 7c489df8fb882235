//! Metrics sink for the storage core.
//!
//! The spec names specific counters (aborted compactions, WAL repairs and
//! lost records, zero-row inserts). They are surfaced through a small
//! trait rather than a concrete type so embedders can plug in their own
//! registry; [`PrometheusRegistrar`] is the default non-trivial
//! implementation, grounded in the teacher's use of the `prometheus` crate
//! for `observability::storage`.

use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

pub trait Registrar: Send + Sync {
    fn inc_zero_row_inserts(&self) {}
    fn inc_compactions_aborted(&self, _level: usize) {}
    fn inc_wal_repairs(&self) {}
    fn inc_wal_lost_records(&self, _count: u64) {}
    fn inc_snapshots(&self) {}
    fn observe_compaction_bytes(&self, _input_bytes: u64, _output_bytes: u64) {}
}

pub struct NoopRegistrar;

impl Registrar for NoopRegistrar {}

/// Prometheus-backed registrar. Construct once per [`crate::db::Database`]
/// and share it via `Config::registrar`.
pub struct PrometheusRegistrar {
    registry: Registry,
    zero_row_inserts: IntCounter,
    compactions_aborted: IntCounterVec,
    wal_repairs: IntCounter,
    wal_lost_records: IntCounter,
    snapshots: IntCounter,
    compaction_input_bytes: IntCounter,
    compaction_output_bytes: IntCounter,
}

impl PrometheusRegistrar {
    pub fn new() -> Self {
        let registry = Registry::new();

        let zero_row_inserts =
            IntCounter::new("frostdb_zero_row_inserts_total", "inserts with zero rows").unwrap();
        let compactions_aborted = IntCounterVec::new(
            Opts::new("frostdb_compactions_aborted_total", "compactions aborted by level"),
            &["level"],
        )
        .unwrap();
        let wal_repairs = IntCounter::new("frostdb_wal_repairs_total", "WAL back-truncations").unwrap();
        let wal_lost_records =
            IntCounter::new("frostdb_wal_lost_records_total", "records lost to WAL repair").unwrap();
        let snapshots = IntCounter::new("frostdb_snapshots_total", "snapshots written").unwrap();
        let compaction_input_bytes =
            IntCounter::new("frostdb_compaction_input_bytes_total", "bytes read by compaction").unwrap();
        let compaction_output_bytes =
            IntCounter::new("frostdb_compaction_output_bytes_total", "bytes written by compaction").unwrap();

        registry.register(Box::new(zero_row_inserts.clone())).ok();
        registry.register(Box::new(compactions_aborted.clone())).ok();
        registry.register(Box::new(wal_repairs.clone())).ok();
        registry.register(Box::new(wal_lost_records.clone())).ok();
        registry.register(Box::new(snapshots.clone())).ok();
        registry.register(Box::new(compaction_input_bytes.clone())).ok();
        registry.register(Box::new(compaction_output_bytes.clone())).ok();

        Self {
            registry,
            zero_row_inserts,
            compactions_aborted,
            wal_repairs,
            wal_lost_records,
            snapshots,
            compaction_input_bytes,
            compaction_output_bytes,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for PrometheusRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl Registrar for PrometheusRegistrar {
    fn inc_zero_row_inserts(&self) {
        self.zero_row_inserts.inc();
    }

    fn inc_compactions_aborted(&self, level: usize) {
        self.compactions_aborted.with_label_values(&[&level.to_string()]).inc();
    }

    fn inc_wal_repairs(&self) {
        self.wal_repairs.inc();
    }

    fn inc_wal_lost_records(&self, count: u64) {
        self.wal_lost_records.inc_by(count);
    }

    fn inc_snapshots(&self) {
        self.snapshots.inc();
    }

    fn observe_compaction_bytes(&self, input_bytes: u64, output_bytes: u64) {
        self.compaction_input_bytes.inc_by(input_bytes);
        self.compaction_output_bytes.inc_by(output_bytes);
    }
}

pub fn prometheus_registrar() -> Arc<dyn Registrar> {
    Arc::new(PrometheusRegistrar::new())
}
