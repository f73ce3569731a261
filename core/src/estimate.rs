use crate::aggregate::{Aggregator, Report};
use crate::walker::{ScanObserver, Walker};
use crate::{Datastore, EstimateConfig, Result};
use std::path::Path;
use tracing::info;

/// Runs a full estimate over `datastore`.
///
/// The configuration is validated before the datastore is touched. Snapshots
/// whose index cannot be parsed are listed in `Report::failures`; if nothing
/// at all could be counted the result is `Error::EmptyResult`.
pub async fn estimate<P: AsRef<Path>>(
    datastore: P,
    config: EstimateConfig,
    observer: &dyn ScanObserver,
) -> Result<Report> {
    config.validate()?;
    let store = Datastore::open(datastore).await?;
    info!(datastore = %store.root().display(), "estimating datastore usage");

    let walker = Walker::new(store, config)?;
    let mut aggregator = Aggregator::new(walker.config().chunk_size);
    for scan in walker.scan(observer).await? {
        aggregator.add_namespace(scan);
    }

    let mut report = aggregator.finish()?;
    if walker.config().summary_only {
        report.strip_snapshots();
    }
    if walker.config().blame {
        report.sort_by_blame();
    }

    info!(
        groups = report.group_count(),
        snapshots = report.snapshots_scanned,
        skipped = report.failures.len(),
        "estimate complete"
    );
    Ok(report)
}
