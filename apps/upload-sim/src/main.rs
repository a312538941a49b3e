//! Stowage upload simulator.
//!
//! Uploads the files named on the command line (or a small demo batch)
//! through the full pipeline against an in-memory network and prints the
//! final queue state as JSON.

mod sim;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use stowage_fees::{Amount, Balances, FeeSnapshot, FlowRate, NetflowPricing, PaymentBalance, PriceParams};
use stowage_upload::{
    AccountContext, BucketInfo, QueueSummary, SelectedFile, TaskSnapshot, UploadConfig,
    UploadEvent, UploadManager,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::sim::{SimNetwork, SimOptions};

const CONFIG_ENV: &str = "STOWAGE_UPLOAD_CONFIG";
const DEFAULT_CONFIG: &str = "upload.json";
const DEMO_ACCOUNT: &str = "0x5a3b0c1d9e8f7a6b5c4d3e2f1a0b9c8d7e6f5a4b";

/// Final state printed after the batch settles.
#[derive(Debug, Serialize)]
struct Report {
    fees: FeeSnapshot,
    summary: QueueSummary,
    tasks: Vec<TaskSnapshot>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting upload simulator");

    let config_path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = UploadConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let files = select_files(std::env::args().skip(1))?;
    let report = run(config, SimOptions::default(), files).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Turns command-line paths into selections. A directory contributes a
/// folder placeholder plus the regular files directly inside it.
fn select_files(args: impl Iterator<Item = String>) -> anyhow::Result<Vec<SelectedFile>> {
    let mut files = Vec::new();
    for arg in args {
        let path = Path::new(&arg);
        if path.is_dir() {
            files.extend(select_dir(path)?);
        } else {
            files.push(SelectedFile::from_path(path).with_context(|| format!("reading {arg}"))?);
        }
    }
    if files.is_empty() {
        info!("no files given, uploading demo batch");
        files = demo_files();
    }
    Ok(files)
}

fn select_dir(dir: &Path) -> anyhow::Result<Vec<SelectedFile>> {
    let root = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut files = vec![SelectedFile::folder(&root)];
    let entries = std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let file = SelectedFile::from_path(&path)?;
        let relative = format!("{root}/{}", file.name);
        files.push(file.with_relative_path(relative));
    }
    Ok(files)
}

fn demo_files() -> Vec<SelectedFile> {
    vec![
        SelectedFile::from_bytes("notes.txt", b"upload simulator demo\n".to_vec()),
        SelectedFile::from_bytes("image.bin", vec![0x5a; 3 * 1024 * 1024 + 17]),
        SelectedFile::folder("archive"),
    ]
}

async fn run(
    config: UploadConfig,
    options: SimOptions,
    files: Vec<SelectedFile>,
) -> anyhow::Result<Report> {
    let network = SimNetwork::new(options, config.redundancy);
    let mut manager = UploadManager::new(
        config,
        network.clone(),
        network,
        std::sync::Arc::new(NetflowPricing),
    )?;

    let events = manager.take_events().context("event receiver already taken")?;
    let logger = tokio::spawn(log_events(events));

    manager.switch_account(AccountContext {
        address: DEMO_ACCOUNT.to_string(),
        bucket: BucketInfo {
            name: "demo-bucket".to_string(),
            payment_address: DEMO_ACCOUNT.to_string(),
            flow_rate: FlowRate::default(),
        },
        prefix: String::new(),
    });
    manager.set_price_params(PriceParams::default());
    manager.set_balances(Balances {
        owner: Amount::from_tokens(10),
        payment: PaymentBalance::SameAsOwner,
    })?;

    let ids = manager.enqueue(files).await?;
    info!(count = ids.len(), "files queued");
    manager.refresh_gas_estimate().await?;

    let fees = manager.fees()?;
    info!(
        total = %fees.fees.total(),
        sufficiency = ?fees.sufficiency,
        "fees estimated"
    );

    let summary = manager.summary()?;
    if summary.ready > 0 && !summary.blocking {
        let batch = manager.confirm().await?;
        if let Some(delegate) = &batch.delegate {
            info!(%delegate, tasks = batch.tasks.len(), "batch signing delegated");
        }
        batch.join().await;
    } else {
        warn!(
            ready = summary.ready,
            invalid = summary.invalid,
            "nothing confirmable in the queue"
        );
    }

    let report = Report {
        fees: manager.fees()?,
        summary: manager.summary()?,
        tasks: manager.snapshot()?,
    };

    // Dropping the manager closes the event channel.
    drop(manager);
    if let Err(e) = logger.await {
        warn!(error = %e, "event logger stopped abnormally");
    }
    Ok(report)
}

async fn log_events(mut events: tokio::sync::mpsc::Receiver<UploadEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Status {
                task,
                status,
                error,
                ..
            } => match error {
                Some(error) => warn!(%task, ?status, %error, "task status"),
                None => info!(%task, ?status, "task status"),
            },
            UploadEvent::Progress { task, progress, .. } => {
                debug!(%task, progress, "upload progress");
            }
            UploadEvent::Removed { task, .. } => debug!(%task, "task removed"),
            UploadEvent::Fees { snapshot, .. } => {
                debug!(total = %snapshot.fees.total(), sufficiency = ?snapshot.sufficiency, "fees updated");
            }
            UploadEvent::DelegateProvisioned {
                address, funded, ..
            } => info!(%address, %funded, "delegate provisioned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stowage_upload::{SealConfig, TaskStatus};

    use super::*;

    fn quick_config() -> UploadConfig {
        UploadConfig {
            seal: SealConfig {
                initial_interval_ms: 1,
                max_interval_ms: 5,
                backoff_factor: 2.0,
                max_attempts: 20,
            },
            ..UploadConfig::default()
        }
    }

    fn instant() -> SimOptions {
        SimOptions {
            max_latency: Duration::ZERO,
            ..SimOptions::default()
        }
    }

    #[tokio::test]
    async fn demo_batch_finishes() {
        let report = run(quick_config(), instant(), demo_files()).await.unwrap();
        assert_eq!(report.tasks.len(), 3);
        assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Finish));
        assert_eq!(report.summary.finished, 3);
        assert!(report.tasks.iter().all(|t| t.tx_hash.is_some()));
    }

    #[tokio::test]
    async fn single_disk_file_is_signed_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();

        let files = select_files(std::iter::once(path.display().to_string())).unwrap();
        let report = run(quick_config(), instant(), files).await.unwrap();
        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].status, TaskStatus::Finish);
        assert_eq!(report.tasks[0].signer.as_deref(), Some(DEMO_ACCOUNT));
    }

    #[test]
    fn directory_selection_adds_folder_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("album");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.jpg"), b"jpg").unwrap();

        let files = select_files(std::iter::once(root.display().to_string())).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].source.is_folder());
        assert_eq!(files[1].relative_path.as_deref(), Some("album/a.jpg"));
    }

    #[test]
    fn empty_selection_falls_back_to_demo() {
        let files = select_files(std::iter::empty()).unwrap();
        assert_eq!(files.len(), demo_files().len());
    }
}
