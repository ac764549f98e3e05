use crate::config::UploadConfig;
use crate::engine::batch::spawn_run;
use crate::engine::job::{JobId, JobStatus, Progress, UploadJob};
use crate::error::UploadError;
use crate::load_sheet;
use crate::store::{CardTypeCatalog, CustomerDirectory, TransactionLedger};
use crate::transaction::{extract_transactions, RawTransactionInput, SheetRow};

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Mutex as RunLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The external collaborators a job writes through.
#[derive(Clone)]
pub struct Backend {
    pub directory: Arc<dyn CustomerDirectory>,
    pub catalog: Arc<dyn CardTypeCatalog>,
    pub ledger: Arc<dyn TransactionLedger>,
}

impl Backend {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CustomerDirectory + CardTypeCatalog + TransactionLedger + 'static,
    {
        Self {
            directory: store.clone(),
            catalog: store.clone(),
            ledger: store,
        }
    }
}

/// Resumable state kept for every job that has not reached a terminal state.
pub(crate) struct JobHandle {
    pub(crate) rows: Arc<Vec<RawTransactionInput>>,
    pub(crate) branch_id: String,
    pub(crate) token: CancellationToken,
    /// Held by the batch loop for its whole run.
    pub(crate) run_lock: Arc<RunLock<()>>,
}

pub(crate) struct Shared {
    pub(crate) config: UploadConfig,
    pub(crate) backend: Backend,
    active: watch::Sender<BTreeMap<JobId, UploadJob>>,
    completed: watch::Sender<Vec<UploadJob>>,
    handles: Mutex<HashMap<JobId, JobHandle>>,
}

impl Shared {
    fn handles(&self) -> MutexGuard<'_, HashMap<JobId, JobHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn run_parts(
        &self,
        id: JobId,
    ) -> Option<(Arc<Vec<RawTransactionInput>>, String, Arc<RunLock<()>>)> {
        self.handles()
            .get(&id)
            .map(|h| (h.rows.clone(), h.branch_id.clone(), h.run_lock.clone()))
    }

    /// Moves the job into `processing` and returns the progress to resume from,
    /// unless it was paused or cancelled before the loop got the run lock.
    pub(crate) fn begin_run(&self, id: JobId, token: &CancellationToken) -> Option<Progress> {
        let handles = self.handles();
        if token.is_cancelled() || !handles.contains_key(&id) {
            return None;
        }

        let mut progress = None;
        self.active.send_if_modified(|jobs| match jobs.get_mut(&id) {
            Some(job) => {
                job.status = JobStatus::Processing;
                job.started_at.get_or_insert_with(Utc::now);
                progress = Some(job.progress);
                true
            }
            None => false,
        });
        progress
    }

    pub(crate) fn update_progress(&self, id: JobId, progress: Progress) {
        self.active.send_if_modified(|jobs| match jobs.get_mut(&id) {
            Some(job) => {
                job.progress = progress;
                true
            }
            None => false,
        });
    }

    /// Finalizes a job whose loop reached the end of its rows, unless a
    /// pause or cancel got in first.
    pub(crate) fn finish(&self, id: JobId, token: &CancellationToken, progress: Progress) {
        let mut handles = self.handles();
        if token.is_cancelled() || handles.remove(&id).is_none() {
            return;
        }

        let status = progress.final_status();
        let error_message = (progress.failed > 0)
            .then(|| format!("{} transactions failed to process", progress.failed));
        info!(
            job_id = %id,
            %status,
            processed = progress.processed,
            failed = progress.failed,
            total = progress.total,
            "upload finished"
        );
        self.retire(id, |job| {
            job.status = status;
            job.progress = progress;
            job.error_message = error_message;
        });
    }

    /// Marks a job failed after its loop died.
    pub(crate) fn fail(&self, id: JobId, message: String) {
        let mut handles = self.handles();
        if handles.remove(&id).is_none() {
            return;
        }
        self.retire(id, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(message);
        });
    }

    // Callers hold the handles lock, which makes the move atomic with respect
    // to pause, resume and cancel.
    fn retire(&self, id: JobId, apply: impl FnOnce(&mut UploadJob)) {
        let mut retired = None;
        self.active
            .send_if_modified(|jobs| match jobs.remove(&id) {
                Some(job) => {
                    retired = Some(job);
                    true
                }
                None => false,
            });

        let Some(mut job) = retired else {
            return;
        };
        apply(&mut job);
        job.paused_at = None;
        job.completed_at = Some(Utc::now());

        let limit = self.config.history_limit;
        self.completed.send_modify(|history| {
            history.insert(0, job);
            history.truncate(limit);
        });
    }
}

/// Owns every upload job: the active set, the bounded history, and the
/// retained rows that make pausing resumable.
#[derive(Clone)]
pub struct UploadManager {
    shared: Arc<Shared>,
}

impl UploadManager {
    pub fn new(config: UploadConfig, backend: Backend) -> Self {
        let (active, _) = watch::channel(BTreeMap::new());
        let (completed, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                config,
                backend,
                active,
                completed,
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.shared.config
    }

    /// Parses the spreadsheet at `path` and starts a job over its valid rows.
    ///
    /// Parse failures reject the upload before any job exists.
    pub async fn start_upload(&self, path: &Path, branch_id: &str) -> Result<JobId, UploadError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let owned = path.to_path_buf();
        let rows = tokio::task::spawn_blocking(move || load_sheet(&owned))
            .await
            .map_err(|e| UploadError::ParseTask(e.to_string()))??;

        Ok(self.start_rows(&file_name, &rows, branch_id))
    }

    pub fn start_rows(&self, file_name: &str, rows: &[SheetRow], branch_id: &str) -> JobId {
        self.start_transactions(file_name, extract_transactions(rows), branch_id)
    }

    /// Starts a job over already-extracted rows. Rows without a mobile or a
    /// positive amount are dropped first.
    pub fn start_transactions(
        &self,
        file_name: &str,
        transactions: Vec<RawTransactionInput>,
        branch_id: &str,
    ) -> JobId {
        let rows: Vec<_> = transactions.into_iter().filter(|tx| tx.is_valid()).collect();
        let job = UploadJob::new(file_name, branch_id, rows.len());
        let id = job.id;
        let token = CancellationToken::new();

        {
            let mut handles = self.shared.handles();
            handles.insert(
                id,
                JobHandle {
                    rows: Arc::new(rows),
                    branch_id: branch_id.to_string(),
                    token: token.clone(),
                    run_lock: Arc::new(RunLock::new(())),
                },
            );
            self.shared.active.send_modify(|jobs| {
                jobs.insert(id, job);
            });
        }

        info!(job_id = %id, file_name, branch_id, "upload job started");
        spawn_run(self.shared.clone(), id, token);
        id
    }

    pub fn pause_upload(&self, id: JobId) -> bool {
        let handles = self.shared.handles();
        let Some(handle) = handles.get(&id) else {
            warn!(job_id = %id, "cannot pause unknown upload");
            return false;
        };

        let paused = self.shared.active.send_if_modified(|jobs| match jobs.get_mut(&id) {
            Some(job) if matches!(job.status, JobStatus::Pending | JobStatus::Processing) => {
                job.status = JobStatus::Paused;
                job.paused_at = Some(Utc::now());
                true
            }
            _ => false,
        });

        if paused {
            handle.token.cancel();
            info!(job_id = %id, "upload paused");
        } else {
            warn!(job_id = %id, "upload is not running");
        }
        paused
    }

    pub fn resume_upload(&self, id: JobId) -> bool {
        let mut handles = self.shared.handles();
        let status = self.shared.active.borrow().get(&id).map(|job| job.status);
        if status != Some(JobStatus::Paused) {
            warn!(job_id = %id, ?status, "job not found or not paused");
            return false;
        }

        let Some(handle) = handles.get_mut(&id) else {
            warn!(job_id = %id, "no retained rows for paused upload");
            return false;
        };

        let token = CancellationToken::new();
        handle.token = token.clone();
        self.shared.active.send_modify(|jobs| {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.paused_at = None;
            }
        });
        drop(handles);

        info!(job_id = %id, "upload resumed");
        spawn_run(self.shared.clone(), id, token);
        true
    }

    /// Stops the job for good. It leaves the active set without entering
    /// the history.
    pub fn cancel_upload(&self, id: JobId) -> bool {
        let mut handles = self.shared.handles();
        let Some(handle) = handles.remove(&id) else {
            warn!(job_id = %id, "cannot cancel unknown upload");
            return false;
        };

        handle.token.cancel();
        self.shared
            .active
            .send_if_modified(|jobs| jobs.remove(&id).is_some());
        info!(job_id = %id, "upload cancelled");
        true
    }

    /// Snapshot of a job that has not reached a terminal state.
    pub fn get_upload_status(&self, id: JobId) -> Option<UploadJob> {
        self.shared.active.borrow().get(&id).cloned()
    }

    /// Finished jobs, most recent first.
    pub fn get_recent_uploads(&self, limit: usize) -> Vec<UploadJob> {
        self.shared
            .completed
            .borrow()
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn active_uploads(&self) -> Vec<UploadJob> {
        self.shared.active.borrow().values().cloned().collect()
    }

    pub fn subscribe_active(&self) -> watch::Receiver<BTreeMap<JobId, UploadJob>> {
        self.shared.active.subscribe()
    }

    pub fn subscribe_completed(&self) -> watch::Receiver<Vec<UploadJob>> {
        self.shared.completed.subscribe()
    }
}
