use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_DATASTORE_BASE: &str = "/mnt/datastore";

/// Optional defaults read from `config.toml`.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory that relative datastore names are resolved against.
    pub datastore_base: Option<PathBuf>,
    pub chunk_size: Option<u64>,
    pub jobs: Option<usize>,
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pbs-estimator").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads `path` if given, which must exist; otherwise the per-user
    /// config file if there is one.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Settings = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn resolve_datastore(&self, datastore: &str) -> PathBuf {
        let path = Path::new(datastore);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.datastore_base
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATASTORE_BASE))
            .join(path)
    }
}
