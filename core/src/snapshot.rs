use crate::index::ChunkIndex;
use crate::{BackupGroup, ChunkID};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

/// Backup time of a snapshot, taken from its directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotTime {
    time: DateTime<Utc>,
    name: String,
}

impl SnapshotTime {
    /// Parses an RFC 3339 directory name such as `2024-05-01T10:00:00Z`.
    pub fn parse(name: &str) -> Option<Self> {
        let time = DateTime::parse_from_rfc3339(name).ok()?.with_timezone(&Utc);
        Some(Self {
            time,
            name: name.to_string(),
        })
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self {
            name: time.to_rfc3339_opts(SecondsFormat::Secs, true),
            time,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Ord for SnapshotTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for SnapshotTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SnapshotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for SnapshotTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.name)
    }
}

/// One snapshot directory of a backup group.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub group: BackupGroup,
    pub time: SnapshotTime,
    pub path: PathBuf,
}

impl Snapshot {
    pub fn new(group: BackupGroup, time: SnapshotTime, path: PathBuf) -> Self {
        Self { group, time, path }
    }

    pub fn summary(&self) -> String {
        format!("{}/{}", self.group, self.time)
    }
}

/// All chunk references of one snapshot, one entry per index file.
#[derive(Debug, Clone)]
pub struct SnapshotIndex {
    pub snapshot: Snapshot,
    pub archives: Vec<ChunkIndex>,
}

impl SnapshotIndex {
    /// Chunk references across every archive, in archive then file order.
    pub fn chunks(&self) -> impl Iterator<Item = &ChunkID> {
        self.archives.iter().flat_map(|a| a.chunks.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}
