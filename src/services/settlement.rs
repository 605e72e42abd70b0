//! Settlement orchestration.
//!
//! Coordinates the payment lifecycle end to end: initiation against the
//! gateway, callback/webhook settlement under the monotonic status rule,
//! exactly-once ledger side effects on the first transition into SUCCESS,
//! and server-to-server verification for transactions stuck in flight.
//!
//! Ordering matters on the settlement path. The status update is the source
//! of truth and lands first; ledger side effects run next and their failures
//! are logged, never rolled back into the status; the audit event lands last
//! and its failure is swallowed. A notification that cannot be decrypted is
//! recorded with its raw blob and never touches the transaction store.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Duration;
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::store::{
    EventLogStore, LedgerReference, NewEventLogEntry, NewPaymentTransaction, PaymentEventType,
    PaymentTransaction, StatusUpdate, SubscriptionStore, TransactionStore, WalletKind,
};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::gateway::client::GatewayApi;
use crate::gateway::error::GatewayError;
use crate::gateway::payload::amount_to_paise;
use crate::gateway::status::map_gateway_status;
use crate::gateway::types::{
    CallbackFields, InitiationFields, LaunchParameters, PayerInfo, PaymentPurpose, TxnStatus,
};
use crate::services::wallet::WalletService;

/// Attempts at generating a fresh correlation id before giving up.
const MAX_ID_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Cashback granted on gold subscription purchases, in basis points.
    pub gold_cashback_bps: u32,
    /// Entitlement lifetime granted per gold purchase, in days.
    pub gold_validity_days: i64,
    /// Prefix for generated correlation ids. Ids are prefix + epoch millis +
    /// four random digits; keep the prefix short so they stay within the
    /// gateway's 20-character limit.
    pub txn_id_prefix: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            gold_cashback_bps: 1000,
            gold_validity_days: 365,
            txn_id_prefix: "T".to_string(),
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Self {
        Self {
            gold_cashback_bps: std::env::var("GOLD_CASHBACK_BPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            gold_validity_days: std::env::var("GOLD_VALIDITY_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(365),
            txn_id_prefix: std::env::var("TXN_ID_PREFIX").unwrap_or_else(|_| "T".to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transaction '{client_txn_id}' not found")]
    TransactionNotFound { client_txn_id: String },

    #[error("Transaction '{client_txn_id}' does not belong to the requesting user")]
    NotOwner { client_txn_id: String },

    #[error("Refund not eligible for {client_txn_id} in status {status}")]
    RefundNotEligible {
        client_txn_id: String,
        status: String,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Validation(v) => AppError::new(AppErrorKind::Validation(v)),
            SettlementError::TransactionNotFound { client_txn_id } => AppError::new(
                AppErrorKind::Domain(DomainError::TransactionNotFound { client_txn_id }),
            ),
            SettlementError::NotOwner { client_txn_id } => AppError::new(AppErrorKind::Domain(
                DomainError::NotTransactionOwner { client_txn_id },
            )),
            SettlementError::RefundNotEligible {
                client_txn_id,
                status,
            } => AppError::new(AppErrorKind::Domain(DomainError::RefundNotEligible {
                client_txn_id,
                status,
            })),
            SettlementError::Gateway(g) => AppError::from(g),
            SettlementError::Store(db) => AppError::from(db),
        }
    }
}

/// Input for a new payment, already authenticated. The purpose tag rides to
/// the gateway in udf1/udf2 and is persisted on the transaction row; absent
/// tags default to a plain gift-card order.
#[derive(Debug, Clone)]
pub struct InitiateCommand {
    pub amount: BigDecimal,
    pub purpose_tag: Option<String>,
    pub purpose_ref: Option<String>,
    pub payer: PayerInfo,
}

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub transaction: PaymentTransaction,
    pub launch: LaunchParameters,
}

/// Result of applying one gateway notification.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub transaction: PaymentTransaction,
    /// Status now in force. A replayed failure after SUCCESS still reads
    /// SUCCESS here.
    pub status: TxnStatus,
    /// True exactly once per transaction: the update that moved it into
    /// SUCCESS for the first time.
    pub first_success: bool,
    pub gateway_message: Option<String>,
}

/// Outcome of a server-to-server verification.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Latest stored row, including any update the inquiry just applied.
    pub transaction: PaymentTransaction,
    /// Status on file before the inquiry ran.
    pub stored_status: TxnStatus,
    /// What the gateway reported, when it answered.
    pub gateway_status: Option<TxnStatus>,
    /// The gateway could not be reached; the stored status stands and the
    /// real outcome is unknown. Never interpreted as a failure.
    pub indeterminate: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconciliationSummary {
    pub scanned: u32,
    pub updated: u32,
    pub settled: u32,
    pub errors: u32,
}

pub struct SettlementService {
    transactions: Arc<dyn TransactionStore>,
    wallets: Arc<WalletService>,
    events: Arc<dyn EventLogStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn GatewayApi>,
    config: SettlementConfig,
}

impl SettlementService {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        wallets: Arc<WalletService>,
        events: Arc<dyn EventLogStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        gateway: Arc<dyn GatewayApi>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            transactions,
            wallets,
            events,
            subscriptions,
            gateway,
            config,
        }
    }

    /// Create an INITIATED transaction and the encrypted launch material for
    /// it. The initiation payload carries gateway credentials, so it is never
    /// written to the event log.
    pub async fn initiate(
        &self,
        user_id: &str,
        cmd: InitiateCommand,
    ) -> Result<InitiatedPayment, SettlementError> {
        if amount_to_paise(&cmd.amount).filter(|p| *p > 0).is_none() {
            return Err(ValidationError::InvalidAmount {
                reason: "amount must be a positive value with at most two decimal places"
                    .to_string(),
            }
            .into());
        }
        let purpose = self.resolve_purpose(&cmd)?;

        let mut transaction = None;
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let client_txn_id = self.generate_txn_id();
            let new_txn = NewPaymentTransaction {
                client_txn_id,
                user_id: user_id.to_string(),
                amount: cmd.amount.clone(),
                purpose_tag: purpose.tag().to_string(),
                purpose_ref: purpose.reference().map(str::to_string),
                payer_name: cmd.payer.name.clone(),
                payer_email: cmd.payer.email.clone(),
                payer_mobile: cmd.payer.mobile.clone(),
            };
            match self.transactions.create(new_txn).await {
                Ok(txn) => {
                    transaction = Some(txn);
                    break;
                }
                Err(err) if err.is_unique_violation() && attempt < MAX_ID_ATTEMPTS => {
                    warn!(attempt, "Generated correlation id collided, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        let transaction = match transaction {
            Some(txn) => txn,
            None => {
                return Err(SettlementError::Store(DatabaseError::new(
                    crate::database::error::DatabaseErrorKind::Unknown {
                        message: "could not generate a unique correlation id".to_string(),
                    },
                )))
            }
        };

        let fields = InitiationFields {
            client_txn_id: transaction.client_txn_id.clone(),
            amount: transaction.amount.clone(),
            payer: cmd.payer.clone(),
            udf1: Some(purpose.tag().to_string()),
            udf2: purpose.reference().map(str::to_string),
        };
        let launch = self.gateway.build_launch(&fields)?;

        self.log_event(NewEventLogEntry {
            client_txn_id: Some(transaction.client_txn_id.clone()),
            event_type: PaymentEventType::Initiate,
            raw_payload: None,
            message: Some(format!(
                "initiated {} for purpose {}",
                transaction.amount,
                purpose.tag()
            )),
        })
        .await;

        info!(
            client_txn_id = %transaction.client_txn_id,
            user_id = %user_id,
            amount = %transaction.amount,
            purpose = purpose.tag(),
            "Payment initiated"
        );
        Ok(InitiatedPayment {
            transaction,
            launch,
        })
    }

    /// Decrypt and apply one browser callback or server webhook. The two
    /// paths are deliberately identical; whichever notification lands first
    /// settles the transaction and the other becomes a no-op replay.
    pub async fn settle_notification(
        &self,
        enc_response: &str,
        source: PaymentEventType,
    ) -> Result<SettlementOutcome, SettlementError> {
        let fields = match self.gateway.decode_notification(enc_response) {
            Ok(fields) => fields,
            Err(err) => {
                warn!(
                    source = source.as_db_str(),
                    error = %err,
                    "Notification rejected: payload did not decode"
                );
                self.log_event(NewEventLogEntry {
                    client_txn_id: None,
                    event_type: source,
                    raw_payload: Some(enc_response.to_string()),
                    message: Some(format!("undecodable payload: {}", err)),
                })
                .await;
                return Err(err.into());
            }
        };
        self.apply_notification(&fields, source).await
    }

    /// Apply already-decoded notification fields: map the gateway status,
    /// run the monotonic update, fire first-success side effects, record the
    /// audit event.
    pub async fn apply_notification(
        &self,
        fields: &CallbackFields,
        source: PaymentEventType,
    ) -> Result<SettlementOutcome, SettlementError> {
        let status = map_gateway_status(&fields.status, fields.status_code.as_deref());
        let update = StatusUpdate {
            status,
            paid_amount: fields.paid_amount.clone(),
            gateway_txn_id: fields.gateway_txn_id.clone(),
            bank_txn_id: fields.bank_txn_id.clone(),
            payment_mode: fields.payment_mode.clone(),
            status_code: fields.status_code.clone(),
            gateway_message: fields.message.clone(),
        };

        let outcome = match self
            .transactions
            .apply_status_update(&fields.client_txn_id, update)
            .await?
        {
            Some(outcome) => outcome,
            None => {
                warn!(
                    client_txn_id = %fields.client_txn_id,
                    source = source.as_db_str(),
                    "Notification for unknown transaction"
                );
                self.log_event(NewEventLogEntry {
                    client_txn_id: Some(fields.client_txn_id.clone()),
                    event_type: source,
                    raw_payload: Some(format!("{:?}", fields)),
                    message: Some("no such transaction".to_string()),
                })
                .await;
                return Err(SettlementError::TransactionNotFound {
                    client_txn_id: fields.client_txn_id.clone(),
                });
            }
        };

        let first_success = outcome.first_success();
        let transaction = outcome.transaction().clone();
        if first_success {
            self.dispatch_success_side_effects(&transaction).await;
        }

        self.log_event(NewEventLogEntry {
            client_txn_id: Some(transaction.client_txn_id.clone()),
            event_type: source,
            raw_payload: Some(format!("{:?}", fields)),
            message: fields.message.clone(),
        })
        .await;

        let status = transaction.txn_status();
        info!(
            client_txn_id = %transaction.client_txn_id,
            source = source.as_db_str(),
            status = %status,
            first_success,
            "Settlement notification applied"
        );
        Ok(SettlementOutcome {
            transaction,
            status,
            first_success,
            gateway_message: fields.message.clone(),
        })
    }

    /// Ask the gateway for the authoritative status of one transaction and
    /// fold the answer in through the same path notifications take. A
    /// transport failure leaves the stored status untouched and reports the
    /// outcome as indeterminate.
    pub async fn verify(
        &self,
        user_id: &str,
        client_txn_id: &str,
    ) -> Result<VerificationReport, SettlementError> {
        let stored = self
            .transactions
            .find_by_client_txn_id(client_txn_id)
            .await?
            .ok_or_else(|| SettlementError::TransactionNotFound {
                client_txn_id: client_txn_id.to_string(),
            })?;
        if stored.user_id != user_id {
            return Err(SettlementError::NotOwner {
                client_txn_id: client_txn_id.to_string(),
            });
        }
        let stored_status = stored.txn_status();

        match self.gateway.status_inquiry(client_txn_id).await {
            Ok(fields) => {
                let gateway_status =
                    map_gateway_status(&fields.status, fields.status_code.as_deref());
                let outcome = self
                    .apply_notification(&fields, PaymentEventType::Verify)
                    .await?;
                Ok(VerificationReport {
                    transaction: outcome.transaction,
                    stored_status,
                    gateway_status: Some(gateway_status),
                    indeterminate: false,
                })
            }
            Err(err) if err.is_indeterminate() => {
                warn!(
                    client_txn_id = %client_txn_id,
                    error = %err,
                    "Gateway unreachable during verification; stored status stands"
                );
                self.log_event(NewEventLogEntry {
                    client_txn_id: Some(client_txn_id.to_string()),
                    event_type: PaymentEventType::Verify,
                    raw_payload: None,
                    message: Some(format!("gateway unreachable: {}", err)),
                })
                .await;
                Ok(VerificationReport {
                    transaction: stored,
                    stored_status,
                    gateway_status: None,
                    indeterminate: true,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record a refund request against a settled transaction. Unlike the
    /// settlement paths, the audit event here IS the operation, so an append
    /// failure propagates.
    pub async fn request_refund(
        &self,
        user_id: &str,
        client_txn_id: &str,
        reason: Option<String>,
    ) -> Result<PaymentTransaction, SettlementError> {
        let transaction = self
            .transactions
            .find_by_client_txn_id(client_txn_id)
            .await?
            .ok_or_else(|| SettlementError::TransactionNotFound {
                client_txn_id: client_txn_id.to_string(),
            })?;
        if transaction.user_id != user_id {
            return Err(SettlementError::NotOwner {
                client_txn_id: client_txn_id.to_string(),
            });
        }
        if !transaction.txn_status().is_success() {
            return Err(SettlementError::RefundNotEligible {
                client_txn_id: transaction.client_txn_id.clone(),
                status: transaction.status.clone(),
            });
        }

        self.events
            .append(NewEventLogEntry {
                client_txn_id: Some(transaction.client_txn_id.clone()),
                event_type: PaymentEventType::RefundRequested,
                raw_payload: None,
                message: reason.clone(),
            })
            .await?;
        info!(
            client_txn_id = %transaction.client_txn_id,
            user_id = %user_id,
            reason = reason.as_deref().unwrap_or(""),
            "Refund requested"
        );
        Ok(transaction)
    }

    /// Sweep unsettled transactions older than `min_age` through a status
    /// inquiry each. Failures are isolated per transaction so one bad row
    /// never stalls the batch.
    pub async fn reconcile_stale(
        &self,
        min_age: Duration,
        batch_size: i64,
    ) -> Result<ReconciliationSummary, SettlementError> {
        let stale = self
            .transactions
            .find_stale_unsettled(min_age, batch_size)
            .await?;
        let mut summary = ReconciliationSummary::default();
        for txn in stale {
            summary.scanned += 1;
            let before = txn.txn_status();
            match self.gateway.status_inquiry(&txn.client_txn_id).await {
                Ok(fields) => {
                    match self
                        .apply_notification(&fields, PaymentEventType::Verify)
                        .await
                    {
                        Ok(outcome) => {
                            if outcome.first_success {
                                summary.settled += 1;
                            }
                            if outcome.status != before {
                                summary.updated += 1;
                            }
                        }
                        Err(err) => {
                            warn!(
                                client_txn_id = %txn.client_txn_id,
                                error = %err,
                                "Reconciliation update failed"
                            );
                            summary.errors += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        client_txn_id = %txn.client_txn_id,
                        error = %err,
                        "Reconciliation inquiry failed"
                    );
                    summary.errors += 1;
                }
            }
        }
        if summary.scanned > 0 {
            info!(
                scanned = summary.scanned,
                updated = summary.updated,
                settled = summary.settled,
                errors = summary.errors,
                "Reconciliation sweep finished"
            );
        }
        Ok(summary)
    }

    fn resolve_purpose(&self, cmd: &InitiateCommand) -> Result<PaymentPurpose, SettlementError> {
        match cmd.purpose_tag.as_deref() {
            None => Ok(PaymentPurpose::GiftCardOrder {
                order_ref: cmd.purpose_ref.clone(),
            }),
            Some(tag) => PaymentPurpose::from_tags(tag, cmd.purpose_ref.as_deref()).ok_or_else(
                || {
                    let validation = match tag {
                        "GOLD_SUBSCRIPTION" | "MERCHANT_SETTLEMENT" => {
                            ValidationError::MissingField {
                                field: "purposeRef".to_string(),
                            }
                        }
                        _ => ValidationError::UnknownPurpose {
                            tag: tag.to_string(),
                        },
                    };
                    SettlementError::Validation(validation)
                },
            ),
        }
    }

    fn generate_txn_id(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
        format!("{}{}{:04}", self.config.txn_id_prefix, millis, suffix)
    }

    /// Ledger and entitlement effects for a transaction that just reached
    /// SUCCESS. Every arm logs its own failure and returns; by the time we
    /// are here the status update is already durable and is never unwound.
    async fn dispatch_success_side_effects(&self, txn: &PaymentTransaction) {
        let purpose = match PaymentPurpose::from_tags(&txn.purpose_tag, txn.purpose_ref.as_deref())
        {
            Some(purpose) => purpose,
            None => {
                error!(
                    client_txn_id = %txn.client_txn_id,
                    purpose_tag = %txn.purpose_tag,
                    "Settled transaction carries an unusable purpose; no side effects applied"
                );
                return;
            }
        };
        let paid = txn.paid_amount.as_ref().unwrap_or(&txn.amount);
        let amount_paise = match amount_to_paise(paid) {
            Some(paise) => paise,
            None => {
                error!(
                    client_txn_id = %txn.client_txn_id,
                    amount = %paid,
                    "Settled amount does not convert to paise; no side effects applied"
                );
                return;
            }
        };

        match purpose {
            PaymentPurpose::WalletTopup => {
                let reference =
                    LedgerReference::new("WALLET_TOPUP").with_reference_id(&txn.client_txn_id);
                if let Err(err) = self
                    .wallets
                    .credit(WalletKind::Customer, &txn.user_id, amount_paise, reference)
                    .await
                {
                    error!(
                        client_txn_id = %txn.client_txn_id,
                        error = %err,
                        "Wallet top-up credit failed after settlement; status update stands"
                    );
                }
            }
            PaymentPurpose::GiftCardOrder { order_ref } => {
                info!(
                    client_txn_id = %txn.client_txn_id,
                    order_ref = order_ref.as_deref().unwrap_or(""),
                    "Gift card order settled; fulfilment proceeds downstream"
                );
            }
            PaymentPurpose::GoldSubscription { plan_ref } => {
                if let Err(err) = self
                    .subscriptions
                    .activate(
                        &txn.user_id,
                        &plan_ref,
                        &txn.client_txn_id,
                        self.config.gold_validity_days,
                    )
                    .await
                {
                    error!(
                        client_txn_id = %txn.client_txn_id,
                        plan_ref = %plan_ref,
                        error = %err,
                        "Gold activation failed after settlement; status update stands"
                    );
                }
                let cashback_paise =
                    amount_paise * i64::from(self.config.gold_cashback_bps) / 10_000;
                if cashback_paise > 0 {
                    let reference = LedgerReference::new("GOLD_CASHBACK")
                        .with_reference_id(&txn.client_txn_id)
                        .with_description(format!("Cashback on gold plan {}", plan_ref));
                    if let Err(err) = self
                        .wallets
                        .credit(
                            WalletKind::Customer,
                            &txn.user_id,
                            cashback_paise,
                            reference,
                        )
                        .await
                    {
                        error!(
                            client_txn_id = %txn.client_txn_id,
                            error = %err,
                            "Gold cashback credit failed after settlement; status update stands"
                        );
                    }
                }
            }
            PaymentPurpose::MerchantSettlement { merchant_id } => {
                let reference = LedgerReference::new("MERCHANT_SETTLEMENT")
                    .with_reference_id(&txn.client_txn_id);
                if let Err(err) = self
                    .wallets
                    .credit(WalletKind::Merchant, &merchant_id, amount_paise, reference)
                    .await
                {
                    error!(
                        client_txn_id = %txn.client_txn_id,
                        merchant_id = %merchant_id,
                        error = %err,
                        "Merchant settlement credit failed; status update stands"
                    );
                }
            }
        }
    }

    async fn log_event(&self, entry: NewEventLogEntry) {
        if let Err(err) = self.events.append(entry).await {
            warn!(error = %err, "Event log append failed; continuing");
        }
    }
}
