//! On-disk segment file format and the meta file that tracks them.
//!
//! A segment is an append-only file of length-prefixed, CRC32'd
//! envelopes: `[len: u32 LE][crc32: u32 LE][txn_id: u64 LE][compression: u8][payload]`.
//! `len`/`crc32` describe the payload as written to disk (after
//! compression), and the compression tag is per-record so a WAL whose
//! `Config::wal.compression` changed between opens still replays every
//! envelope it ever wrote. Segment file names are the 20-digit
//! zero-padded txn id of their first record, so lexical and numeric
//! ordering of file names coincide.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Compression;
use crate::error::{FrostError, Result};

pub fn segment_file_name(first_txn_id: u64) -> String {
    format!("{first_txn_id:020}.seg")
}

pub fn meta_file_path(dir: &Path) -> PathBuf {
    dir.join("wal.meta")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub file_name: String,
    pub first_txn_id: u64,
    pub last_txn_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalMeta {
    pub segments: Vec<SegmentMeta>,
}

impl WalMeta {
    pub fn load(dir: &Path) -> Result<WalMeta> {
        let path = meta_file_path(dir);
        if !path.exists() {
            return Ok(WalMeta::default());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = meta_file_path(dir);
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// One envelope read back from a segment.
pub struct Envelope {
    pub txn_id: u64,
    pub payload: Vec<u8>,
}

/// Encode one envelope, compressing `payload` with `compression` first;
/// `len`/`crc` describe the compressed bytes actually written.
pub fn encode_envelope(txn_id: u64, payload: &[u8], compression: Compression) -> Vec<u8> {
    let wire_payload = compression.compress(payload);
    let crc = crc32fast::hash(&wire_payload);
    let mut buf = Vec::with_capacity(4 + 4 + 8 + 1 + wire_payload.len());
    buf.extend_from_slice(&(wire_payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&txn_id.to_le_bytes());
    buf.push(compression.tag());
    buf.extend_from_slice(&wire_payload);
    buf
}

/// An open segment file being appended to.
pub struct SegmentWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
    compression: Compression,
    pub first_txn_id: u64,
    pub last_txn_id: u64,
}

impl SegmentWriter {
    pub fn create(dir: &Path, first_txn_id: u64, compression: Compression) -> Result<Self> {
        let path = dir.join(segment_file_name(first_txn_id));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(SegmentWriter {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
            compression,
            first_txn_id,
            last_txn_id: first_txn_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn append(&mut self, txn_id: u64, payload: &[u8]) -> Result<()> {
        let envelope = encode_envelope(txn_id, payload, self.compression);
        self.writer.write_all(&envelope)?;
        self.bytes_written += envelope.len() as u64;
        self.last_txn_id = txn_id;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Reads a segment file, stopping at the first corrupt or truncated
/// envelope. Returns the records read plus the byte offset up to which
/// the file was clean, so the caller can back-truncate rather than treat
/// a torn last write as a fatal error.
pub fn read_segment(path: &Path) -> Result<(Vec<Envelope>, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut clean_offset: u64 = 0;

    loop {
        let mut header = [0u8; 17];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(FrostError::Io(e)),
        }
        let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let txn_id = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let compression_tag = header[16];

        let mut wire_payload = vec![0u8; len];
        if reader.read_exact(&mut wire_payload).is_err() {
            // Torn write: header landed but payload did not.
            break;
        }
        if crc32fast::hash(&wire_payload) != crc {
            // Corrupt record: stop here, do not trust anything after it.
            break;
        }
        let payload = match Compression::from_tag(compression_tag).and_then(|c| c.decompress(&wire_payload)) {
            Ok(payload) => payload,
            // An unknown tag or a payload that fails to decompress is just
            // as untrustworthy as a bad checksum: stop here.
            Err(_) => break,
        };

        clean_offset += 17 + len as u64;
        records.push(Envelope { txn_id, payload });
    }

    Ok((records, clean_offset))
}

/// Truncates `path` to `clean_offset` bytes, discarding a torn or
/// corrupt tail. Called after `read_segment` detects one.
pub fn truncate_to(path: &Path, clean_offset: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(clean_offset)?;
    let mut file = file;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}
