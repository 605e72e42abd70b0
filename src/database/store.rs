//! Storage contracts and row types for the settlement domain.
//!
//! Services depend on these traits; the Postgres repositories and the
//! in-memory twins used by the integration tests both implement them.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::gateway::types::TxnStatus;

/// Correlation ids are capped by the gateway protocol.
pub const MAX_CLIENT_TXN_ID_LEN: usize = 20;

/// One payment attempt, keyed by the gateway correlation id.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentTransaction {
    pub client_txn_id: String,
    pub user_id: String,
    pub amount: BigDecimal,
    pub paid_amount: Option<BigDecimal>,
    pub status: String,
    pub gateway_txn_id: Option<String>,
    pub bank_txn_id: Option<String>,
    pub payment_mode: Option<String>,
    pub status_code: Option<String>,
    pub gateway_message: Option<String>,
    pub purpose_tag: String,
    pub purpose_ref: Option<String>,
    pub payer_name: Option<String>,
    pub payer_email: Option<String>,
    pub payer_mobile: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// Typed view of the persisted status column. A value outside the known
    /// vocabulary reads as `Failed`; corrupt rows must not look successful.
    pub fn txn_status(&self) -> TxnStatus {
        TxnStatus::from_db_status(&self.status).unwrap_or(TxnStatus::Failed)
    }
}

/// Fields required to create a transaction. Status always starts INITIATED.
#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub client_txn_id: String,
    pub user_id: String,
    pub amount: BigDecimal,
    pub purpose_tag: String,
    pub purpose_ref: Option<String>,
    pub payer_name: Option<String>,
    pub payer_email: Option<String>,
    pub payer_mobile: Option<String>,
}

/// Fields a gateway notification may apply. `None` leaves the stored value
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: TxnStatus,
    pub paid_amount: Option<BigDecimal>,
    pub gateway_txn_id: Option<String>,
    pub bank_txn_id: Option<String>,
    pub payment_mode: Option<String>,
    pub status_code: Option<String>,
    pub gateway_message: Option<String>,
}

/// Result of a monotonic status update.
#[derive(Debug, Clone)]
pub enum StatusUpdateOutcome {
    /// The status column changed (or was rewritten in place for a
    /// not-yet-successful row). `first_success` is true exactly when this
    /// call moved the row into SUCCESS; ledger side effects key off it.
    Applied {
        transaction: PaymentTransaction,
        first_success: bool,
    },
    /// The row was already SUCCESS. Only non-monetary metadata was
    /// refreshed; status, paid amount and side effects stay as they were.
    AlreadySuccessful { transaction: PaymentTransaction },
}

impl StatusUpdateOutcome {
    pub fn transaction(&self) -> &PaymentTransaction {
        match self {
            StatusUpdateOutcome::Applied { transaction, .. } => transaction,
            StatusUpdateOutcome::AlreadySuccessful { transaction } => transaction,
        }
    }

    pub fn first_success(&self) -> bool {
        matches!(
            self,
            StatusUpdateOutcome::Applied {
                first_success: true,
                ..
            }
        )
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new INITIATED transaction. A duplicate correlation id
    /// surfaces as a unique-violation error.
    async fn create(
        &self,
        new_txn: NewPaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError>;

    async fn find_by_client_txn_id(
        &self,
        client_txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError>;

    /// Apply a status update under the monotonic rule, atomically: a row
    /// that already reached SUCCESS only has its non-monetary metadata
    /// refreshed. Returns `None` when no such transaction exists.
    async fn apply_status_update(
        &self,
        client_txn_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<StatusUpdateOutcome>, DatabaseError>;

    /// Unsettled transactions (INITIATED or PENDING) untouched for at least
    /// `older_than`, oldest first. Feeds the reconciliation sweep.
    async fn find_stale_unsettled(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError>;
}

/// Wallets exist for customers and for marketplace merchants; the pair
/// (owner, kind) identifies an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletKind {
    Customer,
    Merchant,
}

impl WalletKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            WalletKind::Customer => "CUSTOMER",
            WalletKind::Merchant => "MERCHANT",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WalletAccount {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: String,
    pub balance_paise: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerDirection {
    Credit,
    Debit,
}

impl LedgerDirection {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LedgerDirection::Credit => "CREDIT",
            LedgerDirection::Debit => "DEBIT",
        }
    }
}

/// One immutable ledger line. Balances are captured at write time so the
/// history stays auditable even if the account row is later corrected.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WalletLedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub direction: String,
    pub amount_paise: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_id: Option<String>,
    pub reference_type: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a ledger movement was for, carried onto the entry.
#[derive(Debug, Clone)]
pub struct LedgerReference {
    pub reference_type: String,
    pub reference_id: Option<String>,
    pub description: Option<String>,
}

impl LedgerReference {
    pub fn new(reference_type: impl Into<String>) -> Self {
        LedgerReference {
            reference_type: reference_type.into(),
            reference_id: None,
            description: None,
        }
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of a conditional debit.
#[derive(Debug, Clone)]
pub enum DebitOutcome {
    Applied(WalletLedgerEntry),
    /// Balance was lower than the requested amount; nothing changed.
    InsufficientBalance { balance_paise: i64 },
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Add to a wallet, creating the account at zero if absent. Balance
    /// update and ledger entry land atomically.
    async fn credit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<WalletLedgerEntry, DatabaseError>;

    /// Subtract from a wallet if and only if the balance covers it. The
    /// check and the write are one atomic conditional update; concurrent
    /// debits can never drive the balance negative.
    async fn debit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<DebitOutcome, DatabaseError>;

    /// Current balance; an account that was never touched reads as zero.
    async fn balance(&self, kind: WalletKind, owner_id: &str) -> Result<i64, DatabaseError>;

    /// Most recent ledger entries for an owner, newest first.
    async fn ledger_entries(
        &self,
        kind: WalletKind,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<WalletLedgerEntry>, DatabaseError>;
}

/// Protocol events recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentEventType {
    Initiate,
    Callback,
    Webhook,
    Verify,
    RefundRequested,
}

impl PaymentEventType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            PaymentEventType::Initiate => "INITIATE",
            PaymentEventType::Callback => "CALLBACK",
            PaymentEventType::Webhook => "WEBHOOK",
            PaymentEventType::Verify => "VERIFY",
            PaymentEventType::RefundRequested => "REFUND_REQUESTED",
        }
    }
}

/// One audit-trail line. `client_txn_id` is absent when the payload never
/// yielded one (for example, a blob that failed decryption).
#[derive(Debug, Clone)]
pub struct NewEventLogEntry {
    pub client_txn_id: Option<String>,
    pub event_type: PaymentEventType,
    pub raw_payload: Option<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Append to the audit trail. Callers on the settlement path swallow
    /// failures from this; the audit log never blocks a status update.
    async fn append(&self, entry: NewEventLogEntry) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Activate a gold entitlement funded by `source_txn_id`. Idempotent per
    /// source transaction: replays of the same settlement do nothing.
    async fn activate(
        &self,
        user_id: &str,
        plan_ref: &str,
        source_txn_id: &str,
        valid_for_days: i64,
    ) -> Result<(), DatabaseError>;
}
