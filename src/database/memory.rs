//! In-memory implementations of the storage contracts.
//!
//! Behaviourally equivalent to the Postgres repositories, down to the
//! monotonic update rule and the conditional debit. The service and API
//! tests run against these instead of a live database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::store::{
    DebitOutcome, EventLogStore, LedgerDirection, LedgerReference, NewEventLogEntry,
    NewPaymentTransaction, PaymentEventType, PaymentTransaction, StatusUpdate,
    StatusUpdateOutcome, SubscriptionStore, TransactionStore, WalletAccount, WalletKind,
    WalletLedgerEntry, WalletStore, MAX_CLIENT_TXN_ID_LEN,
};
use crate::gateway::types::TxnStatus;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryTransactionStore {
    rows: Mutex<HashMap<String, PaymentTransaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn create(
        &self,
        new_txn: NewPaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        if new_txn.client_txn_id.len() > MAX_CLIENT_TXN_ID_LEN {
            return Err(DatabaseError::new(DatabaseErrorKind::Query {
                message: format!(
                    "value too long for client_txn_id: {} characters",
                    new_txn.client_txn_id.len()
                ),
            }));
        }
        let mut rows = lock(&self.rows);
        if rows.contains_key(&new_txn.client_txn_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payment_transactions_pkey".to_string(),
            }));
        }
        let now = Utc::now();
        let transaction = PaymentTransaction {
            client_txn_id: new_txn.client_txn_id.clone(),
            user_id: new_txn.user_id,
            amount: new_txn.amount,
            paid_amount: None,
            status: TxnStatus::Initiated.as_db_str().to_string(),
            gateway_txn_id: None,
            bank_txn_id: None,
            payment_mode: None,
            status_code: None,
            gateway_message: None,
            purpose_tag: new_txn.purpose_tag,
            purpose_ref: new_txn.purpose_ref,
            payer_name: new_txn.payer_name,
            payer_email: new_txn.payer_email,
            payer_mobile: new_txn.payer_mobile,
            created_at: now,
            updated_at: now,
        };
        rows.insert(new_txn.client_txn_id, transaction.clone());
        Ok(transaction)
    }

    async fn find_by_client_txn_id(
        &self,
        client_txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        Ok(lock(&self.rows).get(client_txn_id).cloned())
    }

    async fn apply_status_update(
        &self,
        client_txn_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<StatusUpdateOutcome>, DatabaseError> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows.get_mut(client_txn_id) else {
            return Ok(None);
        };

        let apply_metadata = |row: &mut PaymentTransaction| {
            if let Some(v) = &update.gateway_txn_id {
                row.gateway_txn_id = Some(v.clone());
            }
            if let Some(v) = &update.bank_txn_id {
                row.bank_txn_id = Some(v.clone());
            }
            if let Some(v) = &update.payment_mode {
                row.payment_mode = Some(v.clone());
            }
            if let Some(v) = &update.status_code {
                row.status_code = Some(v.clone());
            }
            if let Some(v) = &update.gateway_message {
                row.gateway_message = Some(v.clone());
            }
            row.updated_at = Utc::now();
        };

        if row.txn_status() == TxnStatus::Success {
            apply_metadata(row);
            return Ok(Some(StatusUpdateOutcome::AlreadySuccessful {
                transaction: row.clone(),
            }));
        }

        row.status = update.status.as_db_str().to_string();
        if let Some(paid) = &update.paid_amount {
            row.paid_amount = Some(paid.clone());
        }
        apply_metadata(row);
        Ok(Some(StatusUpdateOutcome::Applied {
            transaction: row.clone(),
            first_success: update.status == TxnStatus::Success,
        }))
    }

    async fn find_stale_unsettled(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        let cutoff = Utc::now() - older_than;
        let mut stale: Vec<PaymentTransaction> = lock(&self.rows)
            .values()
            .filter(|row| row.txn_status().is_unsettled() && row.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|row| row.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}

#[derive(Default)]
struct WalletState {
    accounts: HashMap<(WalletKind, String), WalletAccount>,
    entries: Vec<WalletLedgerEntry>,
}

impl WalletState {
    fn account_mut(&mut self, kind: WalletKind, owner_id: &str) -> &mut WalletAccount {
        let now = Utc::now();
        self.accounts
            .entry((kind, owner_id.to_string()))
            .or_insert_with(|| WalletAccount {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                kind: kind.as_db_str().to_string(),
                balance_paise: 0,
                created_at: now,
                updated_at: now,
            })
    }

    fn push_entry(
        &mut self,
        account_id: Uuid,
        direction: LedgerDirection,
        amount_paise: i64,
        balance_before: i64,
        balance_after: i64,
        reference: &LedgerReference,
    ) -> WalletLedgerEntry {
        let entry = WalletLedgerEntry {
            id: Uuid::new_v4(),
            account_id,
            direction: direction.as_db_str().to_string(),
            amount_paise,
            balance_before,
            balance_after,
            reference_id: reference.reference_id.clone(),
            reference_type: reference.reference_type.clone(),
            description: reference.description.clone(),
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }
}

/// Mutex-guarded wallet state; the balance change and its ledger entry land
/// under one lock, mirroring the repository's transaction.
#[derive(Default)]
pub struct MemoryWalletStore {
    state: Mutex<WalletState>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of ledger entries, across all accounts.
    pub fn entry_count(&self) -> usize {
        lock(&self.state).entries.len()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn credit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<WalletLedgerEntry, DatabaseError> {
        let mut state = lock(&self.state);
        let account = state.account_mut(kind, owner_id);
        let balance_before = account.balance_paise;
        account.balance_paise += amount_paise;
        account.updated_at = Utc::now();
        let (account_id, balance_after) = (account.id, account.balance_paise);
        Ok(state.push_entry(
            account_id,
            LedgerDirection::Credit,
            amount_paise,
            balance_before,
            balance_after,
            &reference,
        ))
    }

    async fn debit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<DebitOutcome, DatabaseError> {
        let mut state = lock(&self.state);
        let account = state.account_mut(kind, owner_id);
        if account.balance_paise < amount_paise {
            return Ok(DebitOutcome::InsufficientBalance {
                balance_paise: account.balance_paise,
            });
        }
        let balance_before = account.balance_paise;
        account.balance_paise -= amount_paise;
        account.updated_at = Utc::now();
        let (account_id, balance_after) = (account.id, account.balance_paise);
        Ok(DebitOutcome::Applied(state.push_entry(
            account_id,
            LedgerDirection::Debit,
            amount_paise,
            balance_before,
            balance_after,
            &reference,
        )))
    }

    async fn balance(&self, kind: WalletKind, owner_id: &str) -> Result<i64, DatabaseError> {
        Ok(lock(&self.state)
            .accounts
            .get(&(kind, owner_id.to_string()))
            .map(|account| account.balance_paise)
            .unwrap_or(0))
    }

    async fn ledger_entries(
        &self,
        kind: WalletKind,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<WalletLedgerEntry>, DatabaseError> {
        let state = lock(&self.state);
        let Some(account) = state.accounts.get(&(kind, owner_id.to_string())) else {
            return Ok(Vec::new());
        };
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|entry| entry.account_id == account.id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// Event log that records into a vector. `set_failing(true)` makes appends
/// fail, for exercising the settle-path guarantee that audit failures never
/// block a status update.
#[derive(Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<NewEventLogEntry>>,
    fail_appends: AtomicBool,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<NewEventLogEntry> {
        lock(&self.entries).clone()
    }

    pub fn count_by_type(&self, event_type: PaymentEventType) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|entry| entry.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventLogStore for MemoryEventLog {
    async fn append(&self, entry: NewEventLogEntry) -> Result<(), DatabaseError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(DatabaseError::new(DatabaseErrorKind::Connection {
                message: "event log unavailable".to_string(),
            }));
        }
        lock(&self.entries).push(entry);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub user_id: String,
    pub plan_ref: String,
    pub source_txn_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemorySubscriptionStore {
    records: Mutex<Vec<SubscriptionRecord>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activations(&self) -> Vec<SubscriptionRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn activate(
        &self,
        user_id: &str,
        plan_ref: &str,
        source_txn_id: &str,
        valid_for_days: i64,
    ) -> Result<(), DatabaseError> {
        let mut records = lock(&self.records);
        if records
            .iter()
            .any(|record| record.source_txn_id == source_txn_id)
        {
            return Ok(());
        }
        records.push(SubscriptionRecord {
            user_id: user_id.to_string(),
            plan_ref: plan_ref.to_string(),
            source_txn_id: source_txn_id.to_string(),
            expires_at: Utc::now() + Duration::days(valid_for_days),
        });
        Ok(())
    }
}
