use upload_manager::store::MemoryStore;
use upload_manager::{Backend, JobStatus, UploadConfig, UploadManager};

use anyhow::{bail, Context};
use std::env;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_BRANCH: &str = "main";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let (path, branch_id) = parse_args();
    validate_sheet_file(&path)?;
    process_upload(&path, &branch_id).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = matches!(
        env::var("UPLOAD_LOG_JSON").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    );

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn parse_args() -> (PathBuf, String) {
    let args: Vec<String> = env::args().collect();

    match args.len() {
        2 => (PathBuf::from(&args[1]), DEFAULT_BRANCH.to_string()),
        3 => (PathBuf::from(&args[1]), args[2].clone()),
        _ => {
            eprintln!("Usage: {} <sheet_file> [branch_id]", args[0]);
            eprintln!("  sheet_file: .csv, .xlsx, .xls or .ods with a header row");
            eprintln!("  branch_id:  branch the transactions belong to (default: main)");
            std::process::exit(1);
        }
    }
}

fn validate_sheet_file(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("File '{}' does not exist", path.display());
    }
    Ok(())
}

async fn process_upload(path: &Path, branch_id: &str) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let manager = UploadManager::new(UploadConfig::from_env(), Backend::from_store(store.clone()));

    let job_id = manager
        .start_upload(path, branch_id)
        .await
        .with_context(|| format!("failed to start upload of '{}'", path.display()))?;

    let mut completed = manager.subscribe_completed();
    tokio::select! {
        finished = completed.wait_for(|jobs| jobs.iter().any(|job| job.id == job_id)) => {
            finished.context("upload manager dropped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(%job_id, "interrupted, cancelling upload");
            manager.cancel_upload(job_id);
            store.dump_ledger(stdout())?;
            return Ok(());
        }
    }

    let limit = manager.config().recent_default_limit;
    if let Some(job) = manager
        .get_recent_uploads(limit)
        .into_iter()
        .find(|job| job.id == job_id)
    {
        info!(
            %job_id,
            file_name = %job.file_name,
            status = %job.status,
            processed = job.progress.processed,
            failed = job.progress.failed,
            total = job.progress.total,
            percent = job.progress.percentage(),
            "upload summary"
        );
        if job.status == JobStatus::Failed {
            if let Some(message) = &job.error_message {
                warn!(%job_id, "{message}");
            }
        }
    }

    store.dump_ledger(stdout())?;
    Ok(())
}
