//! Datastore traversal.
//!
//! Walks the selected namespaces, their groups and each group's snapshots
//! oldest first, feeding every snapshot's chunk list into that group's
//! accumulator. Every parsed snapshot updates the seen-set; only snapshots
//! that pass the reporting filter are kept as records.

use crate::accumulator::{GroupAccumulator, GroupTally, Observation};
use crate::index::{IndexKind, IndexParser};
use crate::snapshot::SnapshotTime;
use crate::{BackupGroup, BackupNamespace, Datastore, EstimateConfig, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Chunk count of one index file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveStat {
    pub name: String,
    pub kind: IndexKind,
    pub chunk_count: u64,
}

/// One observed snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub time: SnapshotTime,
    #[serde(flatten)]
    pub observation: Observation,
    pub archives: Vec<ArchiveStat>,
}

/// A snapshot left out of the estimate because an index could not be parsed.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotFailure {
    pub namespace: BackupNamespace,
    pub group: BackupGroup,
    pub snapshot: SnapshotTime,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct GroupScan {
    pub group: BackupGroup,
    /// Reported snapshots, oldest first.
    pub records: Vec<SnapshotRecord>,
    /// Totals over every parsed snapshot, reported or not.
    pub tally: GroupTally,
    pub failures: Vec<SnapshotFailure>,
}

#[derive(Debug, Clone)]
pub struct NamespaceScan {
    pub namespace: BackupNamespace,
    pub groups: Vec<GroupScan>,
}

/// Progress callbacks. Both default to doing nothing.
pub trait ScanObserver {
    fn group_started(&self, _namespace: &BackupNamespace, _group: &BackupGroup) {}

    fn group_finished(&self, _namespace: &BackupNamespace, _scan: &GroupScan) {}
}

pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

pub struct Walker {
    store: Datastore,
    config: EstimateConfig,
    parser: IndexParser,
}

impl Walker {
    /// Validates `config` before touching the datastore.
    pub fn new(store: Datastore, config: EstimateConfig) -> Result<Self> {
        config.validate()?;
        let parser = IndexParser::new(config.chunk_size).with_checksums(config.verify_checksums);
        Ok(Self {
            store,
            config,
            parser,
        })
    }

    pub fn config(&self) -> &EstimateConfig {
        &self.config
    }

    pub async fn namespaces(&self) -> Result<Vec<BackupNamespace>> {
        let base = self.config.namespace.base();
        if self.config.namespace.is_recursive() {
            self.store.namespaces_below(&base).await
        } else {
            Ok(vec![base])
        }
    }

    /// Groups of `ns` that pass the ID filter.
    pub async fn groups(&self, ns: &BackupNamespace) -> Result<Vec<BackupGroup>> {
        let mut groups = self.store.groups(ns).await?;
        groups.retain(|g| self.config.includes_group(g));
        Ok(groups)
    }

    pub async fn scan_group(&self, ns: &BackupNamespace, group: BackupGroup) -> Result<GroupScan> {
        let snapshots = self.store.snapshots(ns, &group).await?;
        debug!(namespace = %ns, group = %group, snapshots = snapshots.len(), "scanning group");

        let mut acc = GroupAccumulator::new(group);
        let mut records = Vec::new();
        let mut failures = Vec::new();

        for snapshot in snapshots {
            let index = match self.parser.read_snapshot(&snapshot).await {
                Ok(index) => index,
                Err(e) if e.is_recoverable() => {
                    warn!(snapshot = %snapshot.summary(), error = %e, "skipping snapshot");
                    failures.push(SnapshotFailure {
                        namespace: ns.clone(),
                        group,
                        snapshot: snapshot.time.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            if index.is_empty() {
                debug!(snapshot = %snapshot.summary(), "no index files");
                continue;
            }

            let observation = acc.observe(&snapshot.time, index.chunks())?;
            debug!(
                snapshot = %snapshot.summary(),
                new = observation.new_chunks,
                referenced = observation.referenced_chunks,
                "observed snapshot"
            );

            if self.config.include_all_snapshots || observation.new_chunks > 0 {
                records.push(SnapshotRecord {
                    time: snapshot.time.clone(),
                    observation,
                    archives: index
                        .archives
                        .iter()
                        .map(|a| ArchiveStat {
                            name: a.archive.clone(),
                            kind: a.kind,
                            chunk_count: a.chunk_count() as u64,
                        })
                        .collect(),
                });
            }
        }

        Ok(GroupScan {
            group,
            records,
            tally: acc.finish(),
            failures,
        })
    }

    pub async fn scan_namespace(
        &self,
        ns: &BackupNamespace,
        observer: &dyn ScanObserver,
    ) -> Result<NamespaceScan> {
        let groups = self.groups(ns).await?;
        info!(namespace = %ns.display_name(), groups = groups.len(), "scanning namespace");

        // each future owns its group's accumulator; `buffered` preserves group order
        let scans: Vec<GroupScan> = stream::iter(groups)
            .map(|group| async move {
                observer.group_started(ns, &group);
                let scan = self.scan_group(ns, group).await?;
                observer.group_finished(ns, &scan);
                Ok::<_, crate::Error>(scan)
            })
            .buffered(self.config.jobs)
            .try_collect()
            .await?;

        Ok(NamespaceScan {
            namespace: ns.clone(),
            groups: scans,
        })
    }

    pub async fn scan(&self, observer: &dyn ScanObserver) -> Result<Vec<NamespaceScan>> {
        let mut scans = Vec::new();
        for ns in self.namespaces().await? {
            scans.push(self.scan_namespace(&ns, observer).await?);
        }
        Ok(scans)
    }
}
