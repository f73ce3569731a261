use crate::snapshot::{Snapshot, SnapshotTime};
use crate::{BackupGroup, BackupNamespace, BackupType, Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Read-only view of a backup datastore directory.
///
/// Namespaces nest below `ns/` directories, groups live in per-type
/// directories and every snapshot is a directory named after its backup time.
///
/// # Datastore Structure
///
/// ```text
/// datastore/
/// ├── vm/100/2024-05-01T10:00:00Z/   # root namespace, VM 100
/// │   ├── drive-scsi0.img.fidx       # chunk index
/// │   └── index.json.blob            # manifest (ignored)
/// ├── ct/101/...
/// └── ns/prod/                       # namespace "prod"
///     ├── vm/...
///     └── ns/web/...                 # namespace "prod/web"
/// ```
///
/// Nothing below the root is ever written.
///
/// # Examples
///
/// ```no_run
/// use pbs_estimator_core::Datastore;
///
/// #[tokio::main]
/// async fn main() -> pbs_estimator_core::Result<()> {
///     let store = Datastore::open("/mnt/datastore/central").await?;
///     for group in store.groups(&Default::default()).await? {
///         println!("{}", group);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Datastore {
    root: PathBuf,
}

impl Datastore {
    /// Opens a datastore, failing with `DatastoreNotFound` or
    /// `PermissionDenied` if the root cannot be listed.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let metadata = fs::metadata(&root)
            .await
            .map_err(|e| Error::from_io(e, &root))?;
        if !metadata.is_dir() {
            return Err(Error::DatastoreNotFound {
                path: root.display().to_string(),
            });
        }
        fs::read_dir(&root)
            .await
            .map(drop)
            .map_err(|e| Error::from_io(e, &root))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace_path(&self, ns: &BackupNamespace) -> PathBuf {
        ns.path_in(&self.root)
    }

    pub fn group_path(&self, ns: &BackupNamespace, group: &BackupGroup) -> PathBuf {
        self.namespace_path(ns).join(group.relative_path())
    }

    /// Direct child namespaces of `ns`, sorted by name.
    pub async fn child_namespaces(&self, ns: &BackupNamespace) -> Result<Vec<BackupNamespace>> {
        let dir = self.namespace_path(ns).join("ns");
        let names = list_dirs(&dir).await?;
        Ok(names.iter().map(|name| ns.child(name)).collect())
    }

    /// `base` followed by all namespaces below it, depth first.
    pub async fn namespaces_below(&self, base: &BackupNamespace) -> Result<Vec<BackupNamespace>> {
        let mut found = Vec::new();
        let mut stack = vec![base.clone()];
        while let Some(ns) = stack.pop() {
            let children = self.child_namespaces(&ns).await?;
            stack.extend(children.into_iter().rev());
            found.push(ns);
        }
        Ok(found)
    }

    /// Backup groups of one namespace, VMs first, then by ID.
    pub async fn groups(&self, ns: &BackupNamespace) -> Result<Vec<BackupGroup>> {
        let mut groups = Vec::new();
        for backup_type in BackupType::ALL {
            let dir = self.namespace_path(ns).join(backup_type.as_str());
            let mut ids: Vec<u64> = Vec::new();
            for name in list_dirs(&dir).await? {
                match name.parse() {
                    Ok(id) => ids.push(id),
                    Err(_) => debug!(path = %dir.join(&name).display(), "skipping non-numeric group"),
                }
            }
            ids.sort_unstable();
            groups.extend(ids.into_iter().map(|id| BackupGroup::new(backup_type, id)));
        }
        Ok(groups)
    }

    /// Snapshots of a group in ascending backup time.
    pub async fn snapshots(&self, ns: &BackupNamespace, group: &BackupGroup) -> Result<Vec<Snapshot>> {
        let dir = self.group_path(ns, group);
        let mut snapshots = Vec::new();
        for name in list_dirs(&dir).await? {
            match SnapshotTime::parse(&name) {
                Some(time) => snapshots.push(Snapshot::new(*group, time, dir.join(&name))),
                None => debug!(path = %dir.join(&name).display(), "skipping non-snapshot directory"),
            }
        }
        snapshots.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(snapshots)
    }
}

/// Names of the subdirectories of `dir`, sorted. A missing directory is empty.
async fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::from_io(e, dir)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::from_io(e, dir))?
    {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
