use indicatif::{ProgressBar, ProgressStyle};
use pbs_estimator_core::walker::GroupScan;
use pbs_estimator_core::{BackupGroup, BackupNamespace, ScanObserver};
use std::time::Duration;

/// Spinner showing the group currently being scanned.
pub struct ScanProgress {
    pb: ProgressBar,
}

impl ScanProgress {
    pub fn new(hidden: bool) -> Self {
        if hidden {
            return Self {
                pb: ProgressBar::hidden(),
            };
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} groups {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Scanning datastore...");
        Self { pb }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ScanObserver for ScanProgress {
    fn group_started(&self, namespace: &BackupNamespace, group: &BackupGroup) {
        self.pb
            .set_message(format!("{} {}", namespace.display_name(), group));
    }

    fn group_finished(&self, _namespace: &BackupNamespace, _scan: &GroupScan) {
        self.pb.inc(1);
    }
}
