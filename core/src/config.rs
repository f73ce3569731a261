use crate::{BackupGroup, BackupNamespace, DEFAULT_CHUNK_SIZE, Error, Result};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Set of guest IDs given as single values and inclusive ranges, e.g. `100,101-105`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFilter {
    ranges: Vec<RangeInclusive<u64>>,
}

impl IdFilter {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for item in spec.split(',').map(str::trim) {
            if item.is_empty() {
                return Err(Error::InvalidIdFilter(format!("empty item in '{}'", spec)));
            }
            let range = match item.split_once('-') {
                Some((start, end)) => {
                    let start = parse_id(start.trim(), spec)?;
                    let end = parse_id(end.trim(), spec)?;
                    if start > end {
                        return Err(Error::InvalidIdFilter(format!(
                            "range {}-{} is reversed",
                            start, end
                        )));
                    }
                    start..=end
                }
                None => {
                    let id = parse_id(item, spec)?;
                    id..=id
                }
            };
            ranges.push(range);
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(&id))
    }

    pub fn matches(&self, group: &BackupGroup) -> bool {
        self.contains(group.id)
    }
}

fn parse_id(value: &str, spec: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::InvalidIdFilter(format!("'{}' in '{}' is not a numeric ID", value, spec)))
}

impl FromStr for IdFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for IdFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.start() == r.end() {
                    r.start().to_string()
                } else {
                    format!("{}-{}", r.start(), r.end())
                }
            })
            .collect();
        f.write_str(&items.join(","))
    }
}

/// Which namespaces a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamespaceSelection {
    /// The root namespace only.
    #[default]
    Root,
    /// Exactly one namespace.
    Single(BackupNamespace),
    /// A namespace and every namespace nested below it.
    Recursive(BackupNamespace),
}

impl NamespaceSelection {
    pub fn all() -> Self {
        NamespaceSelection::Recursive(BackupNamespace::root())
    }

    pub fn base(&self) -> BackupNamespace {
        match self {
            NamespaceSelection::Root => BackupNamespace::root(),
            NamespaceSelection::Single(ns) | NamespaceSelection::Recursive(ns) => ns.clone(),
        }
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self, NamespaceSelection::Recursive(_))
    }
}

/// Engine settings for one estimate run.
#[derive(Debug, Clone)]
pub struct EstimateConfig {
    pub chunk_size: u64,
    pub namespace: NamespaceSelection,
    pub ids: Option<IdFilter>,
    /// Report snapshots that added no new chunks.
    pub include_all_snapshots: bool,
    /// Drop per-snapshot detail from the report.
    pub summary_only: bool,
    /// Order groups and namespaces by new bytes, largest first.
    pub blame: bool,
    pub verify_checksums: bool,
    /// Groups scanned concurrently within a namespace.
    pub jobs: usize,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            namespace: NamespaceSelection::Root,
            ids: None,
            include_all_snapshots: false,
            summary_only: false,
            blame: false,
            verify_checksums: false,
            jobs: 1,
        }
    }
}

impl EstimateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive".to_string()));
        }
        if self.jobs == 0 {
            return Err(Error::InvalidConfig("jobs must be at least 1".to_string()));
        }
        if self.namespace.is_recursive() && self.ids.is_some() {
            return Err(Error::InvalidFilterCombination(
                "an ID filter applies to a single namespace and cannot be combined with scanning all namespaces"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn includes_group(&self, group: &BackupGroup) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.matches(group))
    }
}
