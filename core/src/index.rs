//! Chunk index readers.
//!
//! Every snapshot archive is described by an index file holding a 4096 byte
//! header followed by the digests of the chunks it references:
//!
//! ```text
//! .fidx  magic | uuid | ctime | csum | size u64 | chunk_size u64 | reserved | digest[32]*
//! .didx  magic | uuid | ctime | csum | reserved                  | (end u64, digest[32])*
//! ```
//!
//! All integers are little-endian.

use crate::snapshot::{Snapshot, SnapshotIndex};
use crate::{ChunkID, Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

pub const INDEX_HEADER_SIZE: usize = 4096;

pub const FIXED_INDEX_MAGIC: [u8; 8] = [47, 127, 65, 237, 145, 253, 15, 205];
pub const DYNAMIC_INDEX_MAGIC: [u8; 8] = [28, 145, 78, 165, 25, 186, 179, 205];

const DIGEST_SIZE: usize = 32;

/// File catalog written next to container archives. It is rewritten on every
/// backup and describes archive contents rather than guest data.
pub const CATALOG_ARCHIVE: &str = "catalog.pcat1.didx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Fixed,
    Dynamic,
}

impl IndexKind {
    /// Classifies a snapshot directory entry by extension. Metadata files
    /// (`*.blob`, `owner`, `.locked`, ...) yield `None`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".fidx") {
            Some(IndexKind::Fixed)
        } else if name.ends_with(".didx") {
            Some(IndexKind::Dynamic)
        } else {
            None
        }
    }

    pub fn magic(&self) -> [u8; 8] {
        match self {
            IndexKind::Fixed => FIXED_INDEX_MAGIC,
            IndexKind::Dynamic => DYNAMIC_INDEX_MAGIC,
        }
    }

    pub fn entry_size(&self) -> usize {
        match self {
            IndexKind::Fixed => DIGEST_SIZE,
            IndexKind::Dynamic => 8 + DIGEST_SIZE,
        }
    }
}

/// The parsed content of one index file.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    pub archive: String,
    pub kind: IndexKind,
    pub uuid: Uuid,
    pub ctime: DateTime<Utc>,
    /// Chunk digests in file order, duplicates preserved.
    pub chunks: Vec<ChunkID>,
}

impl ChunkIndex {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Debug, Clone)]
pub struct IndexParser {
    chunk_size: u64,
    verify_checksums: bool,
}

impl IndexParser {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            verify_checksums: false,
        }
    }

    pub fn with_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Parses index file contents. `path` names the file for archive naming,
    /// kind detection and error reporting.
    pub fn parse(&self, path: &Path, data: &[u8]) -> Result<ChunkIndex> {
        let display = path.display().to_string();
        let archive = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| display.clone());
        let kind = IndexKind::from_file_name(&archive)
            .ok_or_else(|| Error::malformed(&display, "not an index file"))?;

        if data.len() < INDEX_HEADER_SIZE {
            return Err(Error::malformed(
                &display,
                format!("file is {} bytes, shorter than the index header", data.len()),
            ));
        }

        let (header, payload) = data.split_at(INDEX_HEADER_SIZE);
        if header[0..8] != kind.magic() {
            return Err(Error::malformed(&display, "bad magic"));
        }

        let entry_size = kind.entry_size();
        if payload.len() % entry_size != 0 {
            return Err(Error::malformed(
                &display,
                format!(
                    "payload of {} bytes is not a multiple of the {} byte entry size",
                    payload.len(),
                    entry_size
                ),
            ));
        }

        if self.verify_checksums {
            let expected = &header[32..64];
            let actual = Sha256::digest(payload);
            if actual.as_slice() != expected {
                return Err(Error::malformed(&display, "index checksum mismatch"));
            }
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&header[8..24]);
        let ctime = DateTime::from_timestamp(le_i64(&header[24..32]), 0).unwrap_or_default();

        let chunks = match kind {
            IndexKind::Fixed => self.fixed_digests(&display, header, payload)?,
            IndexKind::Dynamic => dynamic_digests(&display, payload)?,
        };

        debug!(archive = %archive, chunks = chunks.len(), "parsed index");

        Ok(ChunkIndex {
            archive,
            kind,
            uuid: Uuid::from_bytes(uuid),
            ctime,
            chunks,
        })
    }

    pub async fn load(&self, path: &Path) -> Result<ChunkIndex> {
        let data = fs::read(path)
            .await
            .map_err(|e| Error::malformed(path.display().to_string(), format!("read failed: {}", e)))?;
        self.parse(path, &data)
    }

    /// Loads every index file of a snapshot. Any malformed archive fails the
    /// whole snapshot.
    pub async fn read_snapshot(&self, snapshot: &Snapshot) -> Result<SnapshotIndex> {
        let files = list_index_files(&snapshot.path).await?;
        let mut archives = Vec::with_capacity(files.len());
        for file in files {
            archives.push(self.load(&file).await?);
        }
        Ok(SnapshotIndex {
            snapshot: snapshot.clone(),
            archives,
        })
    }

    fn fixed_digests(&self, display: &str, header: &[u8], payload: &[u8]) -> Result<Vec<ChunkID>> {
        let size = le_u64(&header[64..72]);
        let chunk_size = le_u64(&header[72..80]);
        if chunk_size == 0 {
            return Err(Error::malformed(display, "declared chunk size is zero"));
        }
        if chunk_size != self.chunk_size {
            return Err(Error::malformed(
                display,
                format!(
                    "declared chunk size {} does not match configured chunk size {}",
                    chunk_size, self.chunk_size
                ),
            ));
        }

        let count = payload.len() / DIGEST_SIZE;
        let expected = size.div_ceil(chunk_size);
        if count as u64 != expected {
            return Err(Error::malformed(
                display,
                format!(
                    "{} digests for an image of {} bytes, expected {}",
                    count, size, expected
                ),
            ));
        }

        Ok(payload.chunks_exact(DIGEST_SIZE).map(digest).collect())
    }
}

fn dynamic_digests(display: &str, payload: &[u8]) -> Result<Vec<ChunkID>> {
    let mut chunks = Vec::with_capacity(payload.len() / IndexKind::Dynamic.entry_size());
    let mut last_end = 0u64;
    for entry in payload.chunks_exact(IndexKind::Dynamic.entry_size()) {
        let end = le_u64(&entry[0..8]);
        if end < last_end {
            return Err(Error::malformed(
                display,
                format!("chunk end offset {} precedes {}", end, last_end),
            ));
        }
        last_end = end;
        chunks.push(digest(&entry[8..]));
    }
    Ok(chunks)
}

/// True for index files that hold guest data. The catalog is skipped.
pub fn counts_toward_usage(name: &str) -> bool {
    name != CATALOG_ARCHIVE && IndexKind::from_file_name(name).is_some()
}

/// Lists the chunk-bearing files of a snapshot directory, sorted by name.
/// Listing failures are confined to the snapshot like parse failures.
pub async fn list_index_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let unreadable =
        |e: std::io::Error| Error::malformed(dir.display().to_string(), format!("read failed: {}", e));

    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(unreadable)?;
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !counts_toward_usage(name) {
            continue;
        }
        if entry.file_type().await.map_err(unreadable)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn digest(bytes: &[u8]) -> ChunkID {
    let mut array = [0u8; DIGEST_SIZE];
    array.copy_from_slice(bytes);
    ChunkID::new(array)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(buf)
}
