pub mod accumulator;
pub mod aggregate;
pub mod config;
pub mod datastore;
pub mod error;
pub mod estimate;
pub mod index;
pub mod snapshot;
pub mod types;
pub mod walker;

pub use aggregate::{Aggregator, Report};
pub use config::{EstimateConfig, IdFilter, NamespaceSelection};
pub use datastore::Datastore;
pub use error::{Error, Result};
pub use estimate::estimate;
pub use walker::{NoopObserver, ScanObserver, Walker};
pub use types::*;
