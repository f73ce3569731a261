use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Datastore not found at {path}")]
    DatastoreNotFound { path: String },

    #[error("Permission denied reading {path}")]
    PermissionDenied { path: String },

    #[error("Invalid filter combination: {0}")]
    InvalidFilterCombination(String),

    #[error("Invalid ID filter: {0}")]
    InvalidIdFilter(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed index {path}: {reason}")]
    MalformedIndex { path: String, reason: String },

    #[error("Snapshot {current} of {group} observed after {previous}")]
    SnapshotOrder {
        group: String,
        previous: String,
        current: String,
    },

    #[error("No backup data in scope ({groups} groups matched, {failed} snapshots failed to parse)")]
    EmptyResult { groups: usize, failed: usize },
}

impl Error {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Maps an I/O failure on `path` to the setup-time error taxonomy.
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::DatastoreNotFound {
                path: path.display().to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.display().to_string(),
            },
            _ => Self::Io(err),
        }
    }

    /// Only per-snapshot parse failures are contained; everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedIndex { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_from_io_maps_setup_errors() {
        let path = Path::new("/mnt/datastore/missing");

        let err = Error::from_io(std::io::Error::from(std::io::ErrorKind::NotFound), path);
        assert!(matches!(err, Error::DatastoreNotFound { ref path } if path == "/mnt/datastore/missing"));

        let err = Error::from_io(std::io::Error::from(std::io::ErrorKind::PermissionDenied), path);
        assert!(matches!(err, Error::PermissionDenied { .. }));

        let err = Error::from_io(std::io::Error::from(std::io::ErrorKind::Interrupted), path);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_only_malformed_index_is_recoverable() {
        assert!(Error::malformed("a.fidx", "bad magic").is_recoverable());
        assert!(!Error::InvalidFilterCombination("x".into()).is_recoverable());
        assert!(!Error::EmptyResult { groups: 0, failed: 0 }.is_recoverable());
    }
}
