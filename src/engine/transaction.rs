use crate::error::StoreError;
use crate::mobile::NormalizedMobile;
use crate::store::{CustomerIdentity, LedgerEntry, LedgerStatus, TransactionLedger};
use crate::transaction::RawTransactionInput;

use chrono::Utc;
use rust_decimal::Decimal;

/// Points credited for a row: the explicit value, or one point per currency
/// unit when the column was empty or zero.
pub fn points_earned(tx: &RawTransactionInput) -> Decimal {
    tx.points_to_add
        .filter(|points| !points.is_zero())
        .unwrap_or(tx.amount)
}

pub fn build_entry(
    tx: &RawTransactionInput,
    customer: &CustomerIdentity,
    mobile: &NormalizedMobile,
    branch_id: &str,
) -> LedgerEntry {
    let now = Utc::now();
    LedgerEntry {
        bill_no: tx.bill_number.clone(),
        bill_date: tx.transaction_date.clone(),
        amount: tx.amount,
        customer_id: customer.id.clone(),
        customer_mobile: mobile.to_string(),
        branch_id: branch_id.to_string(),
        points_earned: points_earned(tx),
        points_redeemed: tx.points_to_redeem,
        notes: tx.description.clone(),
        status: LedgerStatus::Completed,
        created_at: now,
        updated_at: now,
    }
}

/// Persists one ledger entry. The customer's balance is not touched, and a
/// customer created just before a failed write is left in place.
pub async fn write_transaction(
    ledger: &dyn TransactionLedger,
    tx: &RawTransactionInput,
    customer: &CustomerIdentity,
    mobile: &NormalizedMobile,
    branch_id: &str,
) -> Result<LedgerEntry, StoreError> {
    let entry = build_entry(tx, customer, mobile, branch_id);
    ledger.insert(entry.clone()).await?;
    Ok(entry)
}
