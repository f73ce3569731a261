//! Folds walker output into byte totals.
//!
//! Byte sizes are chunk counts times the datastore chunk size. Group totals
//! come from the group tally, so they are the same whether or not zero-new
//! snapshots were reported.

use crate::walker::{ArchiveStat, GroupScan, NamespaceScan, SnapshotFailure};
use crate::snapshot::SnapshotTime;
use crate::{BackupGroup, BackupNamespace, BackupType, Error, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub time: SnapshotTime,
    pub new_chunks: u64,
    pub referenced_chunks: u64,
    pub new_bytes: u64,
    pub referenced_bytes: u64,
    pub archives: Vec<ArchiveStat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub backup_type: BackupType,
    pub id: u64,
    pub snapshot_count: u64,
    /// Empty in summary mode.
    pub snapshots: Vec<SnapshotReport>,
    /// Estimated unique footprint of the group.
    pub new_bytes: u64,
    /// Sum of the referenced size of every snapshot.
    pub referenced_bytes: u64,
}

impl GroupReport {
    pub fn group(&self) -> BackupGroup {
        BackupGroup::new(self.backup_type, self.id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceReport {
    pub namespace: BackupNamespace,
    pub groups: Vec<GroupReport>,
    pub new_bytes: u64,
    pub referenced_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub chunk_size: u64,
    pub namespaces: Vec<NamespaceReport>,
    pub new_bytes_total: u64,
    pub referenced_bytes_total: u64,
    pub snapshots_scanned: u64,
    pub failures: Vec<SnapshotFailure>,
}

/// Flat view of one report line for consumers that do not want the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeRecord {
    pub namespace: BackupNamespace,
    pub group_type: BackupType,
    pub group_id: u64,
    pub snapshot: Option<String>,
    pub new_bytes: u64,
    pub referenced_bytes: u64,
}

impl Report {
    /// One record per reported snapshot, or per group when no snapshot
    /// detail is present.
    pub fn records(&self) -> Vec<SizeRecord> {
        let mut records = Vec::new();
        for ns in &self.namespaces {
            for group in &ns.groups {
                let record = |snapshot: Option<String>, new_bytes: u64, referenced_bytes: u64| SizeRecord {
                    namespace: ns.namespace.clone(),
                    group_type: group.backup_type,
                    group_id: group.id,
                    snapshot,
                    new_bytes,
                    referenced_bytes,
                };
                if group.snapshots.is_empty() {
                    records.push(record(None, group.new_bytes, group.referenced_bytes));
                }
                for snap in &group.snapshots {
                    records.push(record(
                        Some(snap.time.to_string()),
                        snap.new_bytes,
                        snap.referenced_bytes,
                    ));
                }
            }
        }
        records
    }

    pub fn group_count(&self) -> usize {
        self.namespaces.iter().map(|ns| ns.groups.len()).sum()
    }

    /// Sorts groups within each namespace, and the namespaces themselves,
    /// by new bytes, largest first. Ties keep traversal order.
    pub fn sort_by_blame(&mut self) {
        for ns in &mut self.namespaces {
            ns.groups.sort_by(|a, b| b.new_bytes.cmp(&a.new_bytes));
        }
        self.namespaces.sort_by(|a, b| b.new_bytes.cmp(&a.new_bytes));
    }

    pub fn strip_snapshots(&mut self) {
        for ns in &mut self.namespaces {
            for group in &mut ns.groups {
                group.snapshots.clear();
            }
        }
    }
}

pub struct Aggregator {
    chunk_size: u64,
    namespaces: Vec<NamespaceReport>,
    failures: Vec<SnapshotFailure>,
    snapshots_scanned: u64,
    groups_seen: usize,
}

impl Aggregator {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            namespaces: Vec::new(),
            failures: Vec::new(),
            snapshots_scanned: 0,
            groups_seen: 0,
        }
    }

    /// Saturates instead of wrapping when an oversized chunk size is configured.
    fn bytes(&self, chunks: u64) -> u64 {
        chunks.saturating_mul(self.chunk_size)
    }

    pub fn add_group(&mut self, namespace: &BackupNamespace, scan: GroupScan) {
        self.groups_seen += 1;
        self.snapshots_scanned += scan.tally.snapshots;
        self.failures.extend(scan.failures);

        // a group whose snapshots all failed or held no index contributes nothing
        if scan.tally.snapshots == 0 {
            return;
        }

        let snapshots = scan
            .records
            .into_iter()
            .map(|record| SnapshotReport {
                new_bytes: self.bytes(record.observation.new_chunks),
                referenced_bytes: self.bytes(record.observation.referenced_chunks),
                new_chunks: record.observation.new_chunks,
                referenced_chunks: record.observation.referenced_chunks,
                time: record.time,
                archives: record.archives,
            })
            .collect();

        let group = GroupReport {
            backup_type: scan.group.backup_type,
            id: scan.group.id,
            snapshot_count: scan.tally.snapshots,
            snapshots,
            new_bytes: self.bytes(scan.tally.new_chunks),
            referenced_bytes: self.bytes(scan.tally.referenced_chunks),
        };

        let index = match self
            .namespaces
            .iter()
            .position(|ns| &ns.namespace == namespace)
        {
            Some(index) => index,
            None => {
                self.namespaces.push(NamespaceReport {
                    namespace: namespace.clone(),
                    groups: Vec::new(),
                    new_bytes: 0,
                    referenced_bytes: 0,
                });
                self.namespaces.len() - 1
            }
        };
        let ns = &mut self.namespaces[index];
        ns.new_bytes = ns.new_bytes.saturating_add(group.new_bytes);
        ns.referenced_bytes = ns.referenced_bytes.saturating_add(group.referenced_bytes);
        ns.groups.push(group);
    }

    pub fn add_namespace(&mut self, scan: NamespaceScan) {
        for group in scan.groups {
            self.add_group(&scan.namespace, group);
        }
    }

    /// Completes the fold. Fails with `EmptyResult` when no snapshot in
    /// scope could be counted.
    pub fn finish(self) -> Result<Report> {
        if self.snapshots_scanned == 0 {
            return Err(Error::EmptyResult {
                groups: self.groups_seen,
                failed: self.failures.len(),
            });
        }

        Ok(Report {
            chunk_size: self.chunk_size,
            new_bytes_total: saturating_sum(self.namespaces.iter().map(|ns| ns.new_bytes)),
            referenced_bytes_total: saturating_sum(
                self.namespaces.iter().map(|ns| ns.referenced_bytes),
            ),
            namespaces: self.namespaces,
            snapshots_scanned: self.snapshots_scanned,
            failures: self.failures,
        })
    }
}

fn saturating_sum(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0, u64::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{GroupTally, Observation};
    use crate::walker::SnapshotRecord;

    const MIB: u64 = 1024 * 1024;

    fn record(name: &str, new_chunks: u64, referenced_chunks: u64) -> SnapshotRecord {
        SnapshotRecord {
            time: SnapshotTime::parse(name).unwrap(),
            observation: Observation {
                new_chunks,
                referenced_chunks,
            },
            archives: Vec::new(),
        }
    }

    fn scan(id: u64, records: Vec<SnapshotRecord>) -> GroupScan {
        let mut tally = GroupTally::default();
        for r in &records {
            tally += r.observation;
        }
        GroupScan {
            group: BackupGroup::new(BackupType::Vm, id),
            records,
            tally,
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_bytes_per_snapshot_group_and_namespace() {
        let mut agg = Aggregator::new(4 * MIB);
        let root = BackupNamespace::root();
        agg.add_group(
            &root,
            scan(
                100,
                vec![
                    record("2024-05-01T10:00:00Z", 3, 3),
                    record("2024-05-02T10:00:00Z", 1, 3),
                ],
            ),
        );
        agg.add_group(&root, scan(101, vec![record("2024-05-01T10:00:00Z", 2, 2)]));

        let report = agg.finish().unwrap();
        let group = &report.namespaces[0].groups[0];
        assert_eq!(group.snapshots[0].new_bytes, 12 * MIB);
        assert_eq!(group.snapshots[1].new_bytes, 4 * MIB);
        assert_eq!(group.snapshots[1].referenced_bytes, 12 * MIB);
        assert_eq!(group.new_bytes, 16 * MIB);
        assert_eq!(group.referenced_bytes, 24 * MIB);

        assert_eq!(report.namespaces[0].new_bytes, 24 * MIB);
        assert_eq!(report.new_bytes_total, 24 * MIB);
        assert_eq!(report.referenced_bytes_total, 32 * MIB);
        assert_eq!(report.snapshots_scanned, 3);
    }

    #[test]
    fn test_blame_reorders_without_changing_sizes() {
        let mut agg = Aggregator::new(MIB);
        let small = BackupNamespace::parse("small").unwrap();
        let big = BackupNamespace::parse("big").unwrap();
        agg.add_group(&small, scan(1, vec![record("2024-05-01T10:00:00Z", 1, 1)]));
        agg.add_group(&big, scan(2, vec![record("2024-05-01T10:00:00Z", 2, 2)]));
        agg.add_group(&big, scan(3, vec![record("2024-05-01T10:00:00Z", 9, 9)]));

        let report = agg.finish().unwrap();
        let mut before = report.records();
        let mut blamed = report.clone();
        blamed.sort_by_blame();

        assert_eq!(blamed.namespaces[0].namespace.to_string(), "big");
        let ids: Vec<u64> = blamed.namespaces[0].groups.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(blamed.new_bytes_total, report.new_bytes_total);

        let mut after = blamed.records();
        let key = |r: &SizeRecord| (r.namespace.to_string(), r.group_id);
        before.sort_by_key(key);
        after.sort_by_key(key);
        assert_eq!(before, after);
    }

    #[test]
    fn test_summary_keeps_totals() {
        let mut agg = Aggregator::new(MIB);
        agg.add_group(
            &BackupNamespace::root(),
            scan(100, vec![record("2024-05-01T10:00:00Z", 2, 2)]),
        );
        let mut report = agg.finish().unwrap();
        let totals = (report.new_bytes_total, report.referenced_bytes_total);
        report.strip_snapshots();

        assert_eq!((report.new_bytes_total, report.referenced_bytes_total), totals);
        let records = report.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].snapshot, None);
        assert_eq!(records[0].new_bytes, 2 * MIB);
    }

    #[test]
    fn test_huge_chunk_size_saturates() {
        let mut agg = Aggregator::new(u64::MAX / 2);
        let root = BackupNamespace::root();
        agg.add_group(&root, scan(100, vec![record("2024-05-01T10:00:00Z", 3, 3)]));
        agg.add_group(&root, scan(101, vec![record("2024-05-01T10:00:00Z", 1, 1)]));

        let report = agg.finish().unwrap();
        assert_eq!(report.namespaces[0].groups[0].new_bytes, u64::MAX);
        assert_eq!(report.namespaces[0].groups[1].new_bytes, u64::MAX / 2);
        assert_eq!(report.namespaces[0].new_bytes, u64::MAX);
        assert_eq!(report.new_bytes_total, u64::MAX);
    }

    #[test]
    fn test_nothing_counted_is_empty_result() {
        let agg = Aggregator::new(MIB);
        assert!(matches!(
            agg.finish(),
            Err(Error::EmptyResult { groups: 0, failed: 0 })
        ));

        let mut agg = Aggregator::new(MIB);
        let mut failed = scan(100, Vec::new());
        failed.failures.push(SnapshotFailure {
            namespace: BackupNamespace::root(),
            group: failed.group,
            snapshot: SnapshotTime::parse("2024-05-01T10:00:00Z").unwrap(),
            reason: "bad magic".to_string(),
        });
        agg.add_group(&BackupNamespace::root(), failed);
        assert!(matches!(
            agg.finish(),
            Err(Error::EmptyResult { groups: 1, failed: 1 })
        ));
    }
}
