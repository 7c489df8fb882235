//! Configuration for the FrostDB storage core.
//!
//! Mirrors the options enumerated in the spec's external-interfaces
//! section: everything is validated eagerly in [`Config::validate`] so
//! that construction failures are configuration errors, never surprises
//! deep in the write path.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FrostError, Result};
use crate::metrics::{NoopRegistrar, Registrar};

/// Object storage client used to persist rotated [`crate::block::TableBlock`]s.
///
/// The storage core only needs `put`; the real uploader (object-store CLI
/// glue) is out of scope per spec.md §1 and lives outside this crate.
#[async_trait::async_trait]
pub trait Bucket: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// A bucket that drops writes; used when no remote storage is configured.
pub struct NullBucket;

#[async_trait::async_trait]
impl Bucket for NullBucket {
    async fn put(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Config {
    /// Directory root for the WAL, snapshots, and any local block staging.
    pub storage_path: PathBuf,
    /// Object storage client persisted blocks are uploaded to.
    pub bucket: Arc<dyn Bucket>,
    /// Enable the write-ahead log. Disabling it is only safe for tests.
    pub wal: WalConfig,
    /// WAL size (bytes) that triggers a snapshot.
    pub snapshot_trigger_size: u64,
    /// TableBlock size (bytes) that triggers a rotation.
    pub active_block_size: u64,
    /// Hint used to size L0 compaction granules.
    pub granule_size: u64,
    /// Minimum number of children a compaction split should produce.
    pub split_size: usize,
    /// Fanout (>=1) for in-memory order structures.
    pub index_degree: usize,
    /// Skip remote reads entirely on query (serve from local state only).
    pub ignore_storage_on_query: bool,
    /// Metrics sink. Defaults to a no-op registrar.
    pub registrar: Arc<dyn Registrar>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("storage_path", &self.storage_path)
            .field("wal", &self.wal)
            .field("snapshot_trigger_size", &self.snapshot_trigger_size)
            .field("active_block_size", &self.active_block_size)
            .field("granule_size", &self.granule_size)
            .field("split_size", &self.split_size)
            .field("index_degree", &self.index_degree)
            .field("ignore_storage_on_query", &self.ignore_storage_on_query)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./frostdb_data"),
            bucket: Arc::new(NullBucket),
            wal: WalConfig::default(),
            snapshot_trigger_size: 16 * 1024 * 1024,
            active_block_size: 512 * 1024 * 1024,
            granule_size: 8 * 1024 * 1024,
            split_size: 2,
            index_degree: 8,
            ignore_storage_on_query: false,
            registrar: Arc::new(NoopRegistrar),
        }
    }
}

/// Write-ahead log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    pub enabled: bool,
    /// WAL directory, defaults to `storage_path/wal`.
    pub dir: Option<PathBuf>,
    /// Segment rotation threshold in bytes.
    pub max_segment_bytes: u64,
    /// Batching loop tick interval in milliseconds. Spec default is 50ms.
    pub batch_interval_ms: u64,
    /// Per-record payload compression. Each envelope carries its own
    /// compression tag, so changing this between opens of the same WAL
    /// is safe: old records decode with whatever they were written with.
    pub compression: Compression,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_segment_bytes: 64 * 1024 * 1024,
            batch_interval_ms: 50,
            compression: Compression::None,
        }
    }
}

/// Payload compression strategy for WAL envelopes (spec.md §9 "Compaction
/// function" sidebar on pluggable strategies applies equally here: the
/// codec is a capability, not a type hierarchy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lz4,
    Zstd,
}

impl Compression {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Zstd => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Zstd),
            other => Err(FrostError::Corruption(format!("unknown WAL compression tag {other}"))),
        }
    }

    pub(crate) fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Compression::None => data.to_vec(),
            Compression::Lz4 => lz4_flex::compress_prepend_size(data),
            Compression::Zstd => zstd::encode_all(data, 3).expect("in-memory zstd encode cannot fail"),
        }
    }

    pub(crate) fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| FrostError::Corruption(format!("lz4 decompress: {e}"))),
            Compression::Zstd => {
                zstd::decode_all(data).map_err(|e| FrostError::Corruption(format!("zstd decompress: {e}")))
            }
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.active_block_size == 0 {
            return Err(FrostError::InvalidConfig("active_block_size must be > 0".into()));
        }
        if self.snapshot_trigger_size == 0 {
            return Err(FrostError::InvalidConfig("snapshot_trigger_size must be > 0".into()));
        }
        if self.index_degree == 0 {
            return Err(FrostError::InvalidConfig("index_degree must be >= 1".into()));
        }
        if self.split_size == 0 {
            return Err(FrostError::InvalidConfig("split_size must be >= 1".into()));
        }
        if self.wal.max_segment_bytes == 0 {
            return Err(FrostError::InvalidConfig("wal.max_segment_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.wal.dir.clone().unwrap_or_else(|| self.storage_path.join("wal"))
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.storage_path.join("snapshots")
    }
}
