use crate::engine::customer::resolve_customer;
use crate::engine::engine::{Backend, Shared};
use crate::engine::job::{JobId, Progress};
use crate::engine::transaction::write_transaction;
use crate::error::{EngineError, StoreError};
use crate::mobile::normalize;
use crate::store::LedgerEntry;
use crate::transaction::RawTransactionInput;

use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs the batch loop on its own task, failing the job if that task dies.
pub(crate) fn spawn_run(shared: Arc<Shared>, id: JobId, token: CancellationToken) {
    tokio::spawn(async move {
        let worker = tokio::spawn(run_job(shared.clone(), id, token));
        if let Err(e) = worker.await {
            let err = EngineError::Aborted {
                message: join_error_message(e),
            };
            error!(job_id = %id, "{err}");
            shared.fail(id, err.to_string());
        }
    });
}

async fn run_job(shared: Arc<Shared>, id: JobId, token: CancellationToken) {
    let Some((rows, branch_id, run_lock)) = shared.run_parts(id) else {
        return;
    };

    // A loop left over from before a pause may still be finishing its row.
    let _running = run_lock.lock_owned().await;
    let Some(progress) = shared.begin_run(id, &token) else {
        return;
    };

    run_batches(&shared, id, &rows, &branch_id, &token, progress).await;
}

async fn run_batches(
    shared: &Shared,
    id: JobId,
    rows: &[RawTransactionInput],
    branch_id: &str,
    token: &CancellationToken,
    mut progress: Progress,
) {
    let total = rows.len();
    let batch_size = shared.config.batch_size.max(1);
    let mut index = progress.cursor().min(total);
    debug!(job_id = %id, total, batch_size, start = index, "starting batch processing");

    while index < total {
        if token.is_cancelled() {
            info!(job_id = %id, index, "upload stopped before batch");
            return;
        }

        let end = (index + batch_size).min(total);
        debug!(
            job_id = %id,
            batch = index / batch_size + 1,
            first = index + 1,
            last = end,
            total,
            "processing batch"
        );

        for (offset, tx) in rows[index..end].iter().enumerate() {
            if token.is_cancelled() {
                info!(job_id = %id, row = index + offset + 1, "upload stopped before row");
                return;
            }

            match process_row(&shared.backend, tx, branch_id).await {
                Ok(entry) => {
                    progress.processed += 1;
                    debug!(job_id = %id, bill_no = %entry.bill_no, customer_id = %entry.customer_id, "row written");
                }
                Err(e) => {
                    progress.failed += 1;
                    warn!(job_id = %id, row = index + offset + 1, bill_no = %tx.bill_number, "row failed: {e}");
                }
            }
            shared.update_progress(id, progress);
        }

        index = end;
        debug!(
            job_id = %id,
            processed = progress.processed,
            failed = progress.failed,
            total,
            "batch completed"
        );
        tokio::time::sleep(shared.config.batch_delay).await;
    }

    shared.finish(id, token, progress);
}

/// Resolves the customer and writes the ledger entry for one row. The two
/// steps are not atomic.
pub(crate) async fn process_row(
    backend: &Backend,
    tx: &RawTransactionInput,
    branch_id: &str,
) -> Result<LedgerEntry, StoreError> {
    let mobile = normalize(&tx.mobile_raw);
    let customer = resolve_customer(
        backend.directory.as_ref(),
        backend.catalog.as_ref(),
        &mobile,
        branch_id,
    )
    .await?;
    write_transaction(backend.ledger.as_ref(), tx, &customer, &mobile, branch_id).await
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        e.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
