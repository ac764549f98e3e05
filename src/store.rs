//! Collaborator interfaces for the hosted backend, plus an in-process
//! implementation used by the binary and the tests.

use crate::error::StoreError;
use crate::mobile::NormalizedMobile;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_CARD_TIER: &str = "bronze";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Unregistered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerIdentity {
    pub id: String,
    pub customer_code: String,
    pub mobile: String,
    pub branch_id: String,
    pub card_type_id: Option<String>,
    pub status: CustomerStatus,
    pub card_status: CardStatus,
    pub points: Decimal,
    pub total_points: Decimal,
}

/// Payload for creating a customer the directory has never seen.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCustomer {
    pub customer_code: String,
    pub mobile: String,
    pub branch_id: String,
    pub card_type_id: Option<String>,
    pub status: CustomerStatus,
    pub card_status: CardStatus,
    pub points: Decimal,
    pub total_points: Decimal,
}

impl NewCustomer {
    pub fn unregistered(
        mobile: &NormalizedMobile,
        branch_id: &str,
        card_type_id: Option<String>,
    ) -> Self {
        Self {
            customer_code: mobile.to_string(),
            mobile: mobile.to_string(),
            branch_id: branch_id.to_string(),
            card_type_id,
            status: CustomerStatus::Active,
            card_status: CardStatus::Unregistered,
            points: Decimal::ZERO,
            total_points: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Completed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub bill_no: String,
    pub bill_date: String,
    pub amount: Decimal,
    pub customer_id: String,
    pub customer_mobile: String,
    pub branch_id: String,
    pub points_earned: Decimal,
    pub points_redeemed: Decimal,
    pub notes: String,
    pub status: LedgerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// At most one customer whose mobile equals `mobile` exactly.
    async fn find_by_mobile(
        &self,
        mobile: &NormalizedMobile,
    ) -> Result<Option<CustomerIdentity>, StoreError>;

    async fn create(&self, customer: NewCustomer) -> Result<CustomerIdentity, StoreError>;
}

#[async_trait]
pub trait CardTypeCatalog: Send + Sync {
    /// Id of the lowest tier, if the catalog defines one.
    async fn find_default_tier(&self) -> Result<Option<String>, StoreError>;
}

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    async fn insert(&self, entry: LedgerEntry) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    customers: HashMap<String, CustomerIdentity>,
    by_mobile: HashMap<String, String>,
    ledger: Vec<LedgerEntry>,
    next_id: u64,
}

/// HashMap-backed directory, catalog and ledger.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    default_tier: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            default_tier: Some(DEFAULT_CARD_TIER.to_string()),
        }
    }

    pub fn without_default_tier() -> Self {
        Self {
            default_tier: None,
            ..Self::new()
        }
    }

    pub fn customers(&self) -> Vec<CustomerIdentity> {
        let mut customers: Vec<_> = self.lock().customers.values().cloned().collect();
        customers.sort_by(|a, b| a.id.cmp(&b.id));
        customers
    }

    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.lock().ledger.clone()
    }

    pub fn dump_ledger<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record([
            "bill_no",
            "bill_date",
            "amount",
            "customer_mobile",
            "points_earned",
            "points_redeemed",
            "status",
        ])?;

        for entry in self.lock().ledger.iter() {
            wtr.write_record([
                entry.bill_no.clone(),
                entry.bill_date.clone(),
                entry.amount.round_dp(4).to_string(),
                entry.customer_mobile.clone(),
                entry.points_earned.round_dp(4).to_string(),
                entry.points_redeemed.round_dp(4).to_string(),
                entry.status.as_str().to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    // A poisoned lock only means another task panicked mid-call; the maps stay usable.
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustomerDirectory for MemoryStore {
    async fn find_by_mobile(
        &self,
        mobile: &NormalizedMobile,
    ) -> Result<Option<CustomerIdentity>, StoreError> {
        let state = self.lock();
        Ok(state
            .by_mobile
            .get(mobile.as_str())
            .and_then(|id| state.customers.get(id))
            .cloned())
    }

    async fn create(&self, customer: NewCustomer) -> Result<CustomerIdentity, StoreError> {
        let mut state = self.lock();
        if state.by_mobile.contains_key(&customer.mobile) {
            return Err(StoreError::Create(format!(
                "duplicate mobile {}",
                customer.mobile
            )));
        }

        state.next_id += 1;
        let id = format!("cust-{}", state.next_id);
        let identity = CustomerIdentity {
            id: id.clone(),
            customer_code: customer.customer_code,
            mobile: customer.mobile,
            branch_id: customer.branch_id,
            card_type_id: customer.card_type_id,
            status: customer.status,
            card_status: customer.card_status,
            points: customer.points,
            total_points: customer.total_points,
        };
        state.by_mobile.insert(identity.mobile.clone(), id.clone());
        state.customers.insert(id, identity.clone());
        Ok(identity)
    }
}

#[async_trait]
impl CardTypeCatalog for MemoryStore {
    async fn find_default_tier(&self) -> Result<Option<String>, StoreError> {
        Ok(self.default_tier.clone())
    }
}

#[async_trait]
impl TransactionLedger for MemoryStore {
    async fn insert(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        self.lock().ledger.push(entry);
        Ok(())
    }
}
