use upload_manager::store::{
    CardTypeCatalog, CustomerDirectory, CustomerIdentity, LedgerEntry, MemoryStore, NewCustomer,
    TransactionLedger,
};
use upload_manager::{
    Backend, JobId, JobStatus, NormalizedMobile, RawTransactionInput, SheetRow, StoreError,
    UploadConfig, UploadJob, UploadManager,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> UploadConfig {
    UploadConfig::default().with_batch_delay(Duration::ZERO)
}

fn tx(index: usize) -> RawTransactionInput {
    let bill = format!("B-{}", index);
    RawTransactionInput {
        description: format!("Bill #{} - Upload", bill),
        bill_number: bill,
        mobile_raw: format!("07912{:05}", index),
        amount: Decimal::from(10 + index as i64),
        points_to_add: None,
        points_to_redeem: Decimal::ZERO,
        transaction_date: "2024-05-01".to_string(),
    }
}

fn txs(count: usize) -> Vec<RawTransactionInput> {
    (1..=count).map(tx).collect()
}

/// Ledger that can reject chosen bills and hold inserts behind a gate.
struct TestLedger {
    store: Arc<MemoryStore>,
    reject: HashSet<String>,
    gate: Option<Semaphore>,
}

impl TestLedger {
    fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            reject: HashSet::new(),
            gate: None,
        }
    }

    fn rejecting(store: Arc<MemoryStore>, bills: &[&str]) -> Self {
        Self {
            reject: bills.iter().map(|b| b.to_string()).collect(),
            ..Self::new(store)
        }
    }

    fn gated(store: Arc<MemoryStore>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(store)
        }
    }

    fn open(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }
}

#[async_trait]
impl TransactionLedger for TestLedger {
    async fn insert(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| StoreError::Write(e.to_string()))?
                .forget();
        }
        if self.reject.contains(&entry.bill_no) {
            return Err(StoreError::Write(format!("rejected {}", entry.bill_no)));
        }
        self.store.insert(entry).await
    }
}

struct PanickingDirectory;

#[async_trait]
impl CustomerDirectory for PanickingDirectory {
    async fn find_by_mobile(
        &self,
        _mobile: &NormalizedMobile,
    ) -> Result<Option<CustomerIdentity>, StoreError> {
        panic!("directory client crashed");
    }

    async fn create(&self, _customer: NewCustomer) -> Result<CustomerIdentity, StoreError> {
        panic!("directory client crashed");
    }
}

fn manager_with_ledger(
    config: UploadConfig,
    store: &Arc<MemoryStore>,
    ledger: Arc<TestLedger>,
) -> UploadManager {
    let directory: Arc<dyn CustomerDirectory> = store.clone();
    let catalog: Arc<dyn CardTypeCatalog> = store.clone();
    UploadManager::new(
        config,
        Backend {
            directory,
            catalog,
            ledger,
        },
    )
}

async fn wait_finished(manager: &UploadManager, id: JobId) -> UploadJob {
    let mut completed = manager.subscribe_completed();
    let jobs = timeout(
        WAIT,
        completed.wait_for(|jobs| jobs.iter().any(|job| job.id == id)),
    )
    .await
    .expect("job did not finish in time")
    .expect("manager dropped");
    jobs.iter().find(|job| job.id == id).cloned().unwrap()
}

async fn wait_active(manager: &UploadManager, id: JobId, check: impl Fn(&UploadJob) -> bool) {
    let mut active = manager.subscribe_active();
    timeout(
        WAIT,
        active.wait_for(|jobs| jobs.get(&id).map(&check).unwrap_or(false)),
    )
    .await
    .expect("condition not reached in time")
    .expect("manager dropped");
}

#[tokio::test]
async fn test_all_rows_succeed() {
    let store = Arc::new(MemoryStore::new());
    let manager = UploadManager::new(fast_config(), Backend::from_store(store.clone()));

    let id = manager.start_transactions("bills.xlsx", txs(12), "branch-1");
    let job = wait_finished(&manager, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total, 12);
    assert_eq!(job.progress.processed, 12);
    assert_eq!(job.progress.failed, 0);
    assert_eq!(job.error_message, None);
    assert_eq!(job.file_name, "bills.xlsx");
    assert_eq!(job.branch_id, "branch-1");
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    assert!(manager.get_upload_status(id).is_none());
    assert_eq!(store.ledger().len(), 12);
    assert_eq!(store.customers().len(), 12);

    // strict input order
    let bills: Vec<_> = store.ledger().into_iter().map(|e| e.bill_no).collect();
    let expected: Vec<_> = (1..=12).map(|i| format!("B-{}", i)).collect();
    assert_eq!(bills, expected);
}

#[tokio::test]
async fn test_all_rows_failing_fails_the_job() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger::rejecting(
        store.clone(),
        &["B-1", "B-2", "B-3"],
    ));
    let manager = manager_with_ledger(fast_config(), &store, ledger);

    let id = manager.start_transactions("bills.csv", txs(3), "branch-1");
    let job = wait_finished(&manager, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress.processed, 0);
    assert_eq!(job.progress.failed, 3);
    assert_eq!(
        job.error_message.as_deref(),
        Some("3 transactions failed to process")
    );
    // customers created before the failed writes are kept
    assert_eq!(store.customers().len(), 3);
    assert!(store.ledger().is_empty());
}

#[tokio::test]
async fn test_partial_failure_still_completes() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger::rejecting(store.clone(), &["B-2", "B-7"]));
    let manager = manager_with_ledger(fast_config(), &store, ledger);

    let id = manager.start_transactions("bills.csv", txs(8), "branch-1");
    let job = wait_finished(&manager, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 6);
    assert_eq!(job.progress.failed, 2);
    assert_eq!(
        job.error_message.as_deref(),
        Some("2 transactions failed to process")
    );
    assert_eq!(store.ledger().len(), 6);
}

#[tokio::test]
async fn test_invalid_rows_are_not_counted() {
    let store = Arc::new(MemoryStore::new());
    let manager = UploadManager::new(fast_config(), Backend::from_store(store.clone()));

    let rows: Vec<SheetRow> = vec![
        [("Customer Mobile", "0791234567"), ("Bill Amount", "10")],
        [("Customer Mobile", "   "), ("Bill Amount", "10")],
        [("Customer Mobile", "0791234568"), ("Bill Amount", "0")],
        [("Customer Mobile", "0791234569"), ("Bill Amount", "-5")],
        [("Customer Mobile", "0791234570"), ("Bill Amount", "7.25")],
    ]
    .into_iter()
    .map(|pairs| {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    })
    .collect();

    let id = manager.start_rows("bills.csv", &rows, "branch-1");
    let job = wait_finished(&manager, id).await;

    assert_eq!(job.progress.total, 2);
    assert_eq!(job.progress.processed, 2);
    assert_eq!(job.progress.failed, 0);
}

#[tokio::test]
async fn test_empty_upload_completes_immediately() {
    let store = Arc::new(MemoryStore::new());
    let manager = UploadManager::new(fast_config(), Backend::from_store(store.clone()));

    let id = manager.start_transactions("empty.csv", Vec::new(), "branch-1");
    let job = wait_finished(&manager, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total, 0);
    assert_eq!(job.progress.percentage(), 0);
}

#[tokio::test]
async fn test_pause_and_resume_without_reprocessing() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger::gated(store.clone()));
    let manager = manager_with_ledger(fast_config(), &store, ledger.clone());

    let id = manager.start_transactions("bills.csv", txs(12), "branch-1");

    ledger.open(3);
    wait_active(&manager, id, |job| job.progress.processed == 3).await;

    // row 4 is now in flight, waiting on the gate
    assert!(manager.pause_upload(id));
    let paused = manager.get_upload_status(id).unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert!(paused.can_resume());
    assert!(paused.paused_at.is_some());

    ledger.open(1);
    wait_active(&manager, id, |job| job.progress.processed == 4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frozen = manager.get_upload_status(id).unwrap();
    assert_eq!(frozen.status, JobStatus::Paused);
    assert_eq!(frozen.progress.processed, 4);
    assert_eq!(store.ledger().len(), 4);

    ledger.open(100);
    assert!(manager.resume_upload(id));
    assert_eq!(
        manager.get_upload_status(id).map(|job| job.status),
        Some(JobStatus::Processing)
    );

    let job = wait_finished(&manager, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 12);
    assert_eq!(job.progress.failed, 0);

    let bills: Vec<_> = store.ledger().into_iter().map(|e| e.bill_no).collect();
    let expected: Vec<_> = (1..=12).map(|i| format!("B-{}", i)).collect();
    assert_eq!(bills, expected);
}

#[tokio::test]
async fn test_resume_while_row_in_flight() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger::gated(store.clone()));
    let manager = manager_with_ledger(fast_config(), &store, ledger.clone());

    let id = manager.start_transactions("bills.csv", txs(7), "branch-1");
    wait_active(&manager, id, |job| job.status == JobStatus::Processing).await;

    // row 1 is blocked on the gate across the whole pause/resume
    assert!(manager.pause_upload(id));
    assert!(manager.resume_upload(id));
    ledger.open(100);

    let job = wait_finished(&manager, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 7);
    assert_eq!(job.progress.failed, 0);

    let bills: Vec<_> = store.ledger().into_iter().map(|e| e.bill_no).collect();
    let expected: Vec<_> = (1..=7).map(|i| format!("B-{}", i)).collect();
    assert_eq!(bills, expected);
}

#[tokio::test]
async fn test_pause_between_batches() {
    let store = Arc::new(MemoryStore::new());
    let config = UploadConfig::default().with_batch_delay(Duration::from_millis(200));
    let manager = UploadManager::new(config, Backend::from_store(store.clone()));

    let id = manager.start_transactions("bills.csv", txs(7), "branch-1");
    wait_active(&manager, id, |job| job.progress.processed == 5).await;

    // the first batch is five rows, then the loop sleeps
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get_upload_status(id).unwrap().progress.processed, 5);
    assert_eq!(store.ledger().len(), 5);

    assert!(manager.pause_upload(id));
    tokio::time::sleep(Duration::from_millis(400)).await;

    let paused = manager.get_upload_status(id).unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.progress.processed, 5);
    assert_eq!(store.ledger().len(), 5);

    assert!(manager.resume_upload(id));
    let job = wait_finished(&manager, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 7);
    assert_eq!(store.ledger().len(), 7);
}

#[tokio::test]
async fn test_pause_after_last_row_keeps_job_paused() {
    let store = Arc::new(MemoryStore::new());
    let config = UploadConfig::default().with_batch_delay(Duration::from_millis(200));
    let manager = UploadManager::new(config, Backend::from_store(store.clone()));

    let id = manager.start_transactions("bills.csv", txs(5), "branch-1");
    wait_active(&manager, id, |job| job.progress.processed == 5).await;

    // every row is written but the loop has not finalized yet
    assert!(manager.pause_upload(id));
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(
        manager.get_upload_status(id).map(|job| job.status),
        Some(JobStatus::Paused)
    );
    assert!(manager.get_recent_uploads(10).is_empty());

    assert!(manager.resume_upload(id));
    let job = wait_finished(&manager, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 5);
    assert_eq!(store.ledger().len(), 5);
}

#[tokio::test]
async fn test_resume_carries_failed_rows_forward() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger {
        reject: ["B-1".to_string(), "B-2".to_string()].into_iter().collect(),
        ..TestLedger::gated(store.clone())
    });
    let manager = manager_with_ledger(fast_config(), &store, ledger.clone());

    let id = manager.start_transactions("bills.csv", txs(6), "branch-1");

    ledger.open(3);
    wait_active(&manager, id, |job| job.progress.cursor() == 3).await;
    assert!(manager.pause_upload(id));
    ledger.open(1);
    wait_active(&manager, id, |job| job.progress.cursor() == 4).await;

    ledger.open(100);
    assert!(manager.resume_upload(id));
    let job = wait_finished(&manager, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 4);
    assert_eq!(job.progress.failed, 2);
    assert_eq!(store.ledger().len(), 4);
}

#[tokio::test]
async fn test_cancel_removes_job_everywhere() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger::gated(store.clone()));
    let manager = manager_with_ledger(fast_config(), &store, ledger.clone());

    let id = manager.start_transactions("bills.csv", txs(10), "branch-1");
    wait_active(&manager, id, |job| job.status == JobStatus::Processing).await;

    assert!(manager.cancel_upload(id));
    assert!(manager.get_upload_status(id).is_none());
    assert!(manager.active_uploads().is_empty());

    // the in-flight row may still land, nothing after it
    ledger.open(100);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.ledger().len() <= 1);
    assert!(manager.get_upload_status(id).is_none());
    assert!(manager.get_recent_uploads(10).is_empty());
    assert!(!manager.resume_upload(id));
    assert!(!manager.cancel_upload(id));
}

#[tokio::test]
async fn test_cancel_paused_job() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger::gated(store.clone()));
    let manager = manager_with_ledger(fast_config(), &store, ledger.clone());

    let id = manager.start_transactions("bills.csv", txs(4), "branch-1");
    wait_active(&manager, id, |job| job.status == JobStatus::Processing).await;
    assert!(manager.pause_upload(id));

    assert!(manager.cancel_upload(id));
    assert!(!manager.resume_upload(id));
    assert!(manager.get_recent_uploads(10).is_empty());
}

#[tokio::test]
async fn test_control_failures_return_false() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(TestLedger::gated(store.clone()));
    let manager = manager_with_ledger(fast_config(), &store, ledger.clone());
    let unknown = uuid::Uuid::new_v4();

    assert!(!manager.pause_upload(unknown));
    assert!(!manager.resume_upload(unknown));
    assert!(!manager.cancel_upload(unknown));

    let id = manager.start_transactions("bills.csv", txs(2), "branch-1");
    wait_active(&manager, id, |job| job.status == JobStatus::Processing).await;

    // not paused
    assert!(!manager.resume_upload(id));

    assert!(manager.pause_upload(id));
    // already paused
    assert!(!manager.pause_upload(id));

    ledger.open(100);
    assert!(manager.resume_upload(id));
    let job = wait_finished(&manager, id).await;
    assert_eq!(job.status, JobStatus::Completed);

    // finished jobs can no longer be controlled
    assert!(!manager.pause_upload(id));
    assert!(!manager.resume_upload(id));
    assert!(!manager.cancel_upload(id));
}

#[tokio::test]
async fn test_history_is_bounded_and_most_recent_first() {
    let store = Arc::new(MemoryStore::new());
    let config = UploadConfig {
        history_limit: 3,
        ..fast_config()
    };
    let manager = UploadManager::new(config, Backend::from_store(store.clone()));

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = manager.start_transactions(&format!("bills-{}.csv", i), txs(1), "branch-1");
        wait_finished(&manager, id).await;
        ids.push(id);
    }

    let recent = manager.get_recent_uploads(10);
    let recent_ids: Vec<_> = recent.iter().map(|job| job.id).collect();
    assert_eq!(recent_ids, vec![ids[4], ids[3], ids[2]]);

    assert_eq!(manager.get_recent_uploads(2).len(), 2);
    assert_eq!(manager.get_recent_uploads(0).len(), 0);
}

#[tokio::test]
async fn test_job_moves_to_history_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let manager = UploadManager::new(fast_config(), Backend::from_store(store.clone()));

    let id = manager.start_transactions("bills.csv", txs(7), "branch-1");
    wait_finished(&manager, id).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let occurrences = manager
        .get_recent_uploads(20)
        .iter()
        .filter(|job| job.id == id)
        .count();
    assert_eq!(occurrences, 1);
    assert!(manager.get_upload_status(id).is_none());
}

#[tokio::test]
async fn test_escaped_panic_fails_the_job() {
    let store = Arc::new(MemoryStore::new());
    let manager = UploadManager::new(
        fast_config(),
        Backend {
            directory: Arc::new(PanickingDirectory),
            catalog: store.clone(),
            ledger: store.clone(),
        },
    );

    let id = manager.start_transactions("bills.csv", txs(3), "branch-1");
    let job = wait_finished(&manager, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("directory client crashed"));
    assert!(manager.get_upload_status(id).is_none());
}

#[tokio::test]
async fn test_concurrent_jobs_are_independent() {
    let store = Arc::new(MemoryStore::new());
    let manager = UploadManager::new(fast_config(), Backend::from_store(store.clone()));

    let first = manager.start_transactions("a.csv", txs(6), "branch-1");
    let second = manager.start_transactions("b.csv", (7..=15).map(tx).collect(), "branch-2");

    let a = wait_finished(&manager, first).await;
    let b = wait_finished(&manager, second).await;

    assert_eq!(a.progress.processed, 6);
    assert_eq!(b.progress.processed, 9);
    assert_eq!(store.ledger().len(), 15);
    assert_eq!(manager.get_recent_uploads(10).len(), 2);
}
