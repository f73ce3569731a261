// Synthetic datastore fixtures shared by the integration tests
#![allow(dead_code)]

use pbs_estimator_core::index::{DYNAMIC_INDEX_MAGIC, FIXED_INDEX_MAGIC, INDEX_HEADER_SIZE};
use pbs_estimator_core::{ChunkID, DEFAULT_CHUNK_SIZE};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MIB: u64 = 1024 * 1024;

pub fn chunk(n: u8) -> ChunkID {
    ChunkID::new([n; 32])
}

pub fn chunks(ids: &[u8]) -> Vec<ChunkID> {
    ids.iter().map(|n| chunk(*n)).collect()
}

pub fn fixed_index(chunk_size: u64, chunks: &[ChunkID]) -> Vec<u8> {
    let mut data = vec![0u8; INDEX_HEADER_SIZE];
    data[0..8].copy_from_slice(&FIXED_INDEX_MAGIC);
    data[64..72].copy_from_slice(&(chunk_size * chunks.len() as u64).to_le_bytes());
    data[72..80].copy_from_slice(&chunk_size.to_le_bytes());
    for c in chunks {
        data.extend_from_slice(c.as_bytes());
    }
    data
}

pub fn dynamic_index(chunks: &[ChunkID]) -> Vec<u8> {
    let mut data = vec![0u8; INDEX_HEADER_SIZE];
    data[0..8].copy_from_slice(&DYNAMIC_INDEX_MAGIC);
    for (i, c) in chunks.iter().enumerate() {
        data.extend_from_slice(&((i as u64 + 1) * 65536).to_le_bytes());
        data.extend_from_slice(c.as_bytes());
    }
    data
}

/// Builds a datastore directory tree in a temporary directory.
pub struct TestDatastore {
    dir: TempDir,
}

impl TestDatastore {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn snapshot_dir(&self, ns: &str, group: &str, time: &str) -> PathBuf {
        let mut dir = self.dir.path().to_path_buf();
        for segment in ns.split('/').filter(|s| !s.is_empty()) {
            dir.push("ns");
            dir.push(segment);
        }
        let dir = dir.join(group).join(time);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.json.blob"), b"{}").unwrap();
        dir
    }

    /// Adds a VM snapshot with one disk image index.
    pub fn vm(&self, ns: &str, id: u64, time: &str, ids: &[u8]) -> &Self {
        let dir = self.snapshot_dir(ns, &format!("vm/{}", id), time);
        fs::write(
            dir.join("drive-scsi0.img.fidx"),
            fixed_index(DEFAULT_CHUNK_SIZE, &chunks(ids)),
        )
        .unwrap();
        fs::write(dir.join("qemu-server.conf.blob"), b"cores: 2").unwrap();
        self
    }

    /// Adds a container snapshot with one archive index.
    pub fn ct(&self, ns: &str, id: u64, time: &str, ids: &[u8]) -> &Self {
        let dir = self.snapshot_dir(ns, &format!("ct/{}", id), time);
        fs::write(dir.join("root.pxar.didx"), dynamic_index(&chunks(ids))).unwrap();
        fs::write(dir.join("pct.conf.blob"), b"arch: amd64").unwrap();
        self
    }

    /// Adds an extra index file to an existing or new snapshot.
    pub fn archive(&self, ns: &str, group: &str, time: &str, name: &str, data: Vec<u8>) -> &Self {
        let dir = self.snapshot_dir(ns, group, time);
        fs::write(dir.join(name), data).unwrap();
        self
    }
}
