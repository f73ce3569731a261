mod progress;
mod report;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use pbs_estimator_core::{
    BackupNamespace, DEFAULT_CHUNK_SIZE, Error, EstimateConfig, IdFilter, NamespaceSelection,
    estimate,
};
use progress::ScanProgress;
use settings::Settings;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(
    name = "pbs-estimator",
    about = "Estimate space used by VMs and containers in a Proxmox Backup Server datastore",
    long_about = "Reads the chunk indexes of every snapshot and attributes each chunk to the first \
                  snapshot of its backup group that references it. Chunks shared between groups are \
                  counted once per group, so totals overestimate real datastore usage."
)]
struct Cli {
    #[arg(help = "Datastore path, or a name under the datastore base (e.g. /mnt/datastore/central)")]
    datastore: String,

    #[arg(short = 'i', long = "id", value_name = "IDS", help = "Filter by VM/CT IDs, e.g. 100,101-105")]
    ids: Option<String>,

    #[arg(short, long, env = "PBS_ESTIMATOR_NAMESPACE", help = "Namespace to scan (default: root namespace)")]
    namespace: Option<String>,

    #[arg(long, help = "Scan all namespaces (below --namespace if given)")]
    all_namespaces: bool,

    #[arg(short = 'a', long = "all", help = "Include snapshots with no new chunks")]
    include_all: bool,

    #[arg(short = 's', long = "sum", help = "Show only per-group totals")]
    summary: bool,

    #[arg(short, long, help = "Sort by highest space usage")]
    blame: bool,

    #[arg(short, long, help = "Output JSON")]
    json: bool,

    #[arg(short, long, value_name = "FILE", help = "Also write results to a file")]
    output: Option<PathBuf>,

    #[arg(long, env = "PBS_ESTIMATOR_CHUNK_SIZE", help = "Datastore chunk size in bytes [default: 4194304]")]
    chunk_size: Option<u64>,

    #[arg(long, env = "PBS_ESTIMATOR_JOBS", help = "Groups to scan concurrently [default: 1]")]
    jobs: Option<usize>,

    #[arg(long, help = "Verify index checksums")]
    verify_index: bool,

    #[arg(long, env = "PBS_ESTIMATOR_CONFIG", help = "Config file path")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

impl Cli {
    fn estimate_config(&self, settings: &Settings) -> Result<EstimateConfig> {
        let namespace = match &self.namespace {
            Some(ns) => BackupNamespace::parse(ns)?,
            None => BackupNamespace::root(),
        };
        let namespace = if self.all_namespaces {
            NamespaceSelection::Recursive(namespace)
        } else if namespace.is_root() {
            NamespaceSelection::Root
        } else {
            NamespaceSelection::Single(namespace)
        };

        let ids = self.ids.as_deref().map(IdFilter::parse).transpose()?;

        Ok(EstimateConfig {
            chunk_size: self
                .chunk_size
                .or(settings.chunk_size)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            namespace,
            ids,
            include_all_snapshots: self.include_all,
            summary_only: self.summary,
            blame: self.blame,
            verify_checksums: self.verify_index,
            jobs: self.jobs.or(settings.jobs).unwrap_or(1),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let settings = Settings::load(cli.config.as_deref())?;
    let datastore = settings.resolve_datastore(&cli.datastore);
    let config = cli.estimate_config(&settings)?;

    info!("Scanning datastore at: {}", datastore.display());

    let progress = ScanProgress::new(cli.quiet || cli.json);
    let result = estimate(&datastore, config, &progress).await;
    progress.finish();

    let rendered = match result {
        Ok(report) => {
            if !report.failures.is_empty() {
                warn!("{} snapshot(s) skipped", report.failures.len());
            }
            if cli.json {
                report::render_json(&report)?
            } else {
                report::render_text(&report)
            }
        }
        Err(Error::EmptyResult { groups, failed }) => {
            warn!("Nothing to report for {}", datastore.display());
            report::render_empty(cli.json, groups, failed)?
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to estimate {}", datastore.display()));
        }
    };

    print!("{}", rendered);

    if let Some(path) = &cli.output {
        tokio::fs::write(path, &rendered)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Results written to {}", path.display());
    }

    Ok(())
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "pbs_estimator={level},pbs_estimator_core={level}"
        )))
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
