//! Wallet ledger service.
//!
//! All balances are integer paise. Credits and debits go through the store's
//! atomic read-modify-write, so this layer only validates amounts, shapes
//! errors and logs the movement.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::database::error::DatabaseError;
use crate::database::store::{
    DebitOutcome, LedgerReference, WalletKind, WalletLedgerEntry, WalletStore,
};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};

pub const DEFAULT_LEDGER_PAGE: i64 = 20;
pub const MAX_LEDGER_PAGE: i64 = 100;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Insufficient balance: available {available_paise} paise, required {required_paise} paise")]
    InsufficientBalance {
        available_paise: i64,
        required_paise: i64,
    },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

pub struct WalletService {
    store: Arc<dyn WalletStore>,
}

impl WalletService {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    pub async fn credit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<WalletLedgerEntry, WalletError> {
        ensure_positive(amount_paise)?;
        let entry = self
            .store
            .credit(kind, owner_id, amount_paise, reference)
            .await?;
        info!(
            owner_id = %owner_id,
            kind = ?kind,
            amount_paise,
            balance_paise = entry.balance_after,
            reference_type = %entry.reference_type,
            "Wallet credited"
        );
        Ok(entry)
    }

    pub async fn debit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<WalletLedgerEntry, WalletError> {
        ensure_positive(amount_paise)?;
        match self
            .store
            .debit(kind, owner_id, amount_paise, reference)
            .await?
        {
            DebitOutcome::Applied(entry) => {
                info!(
                    owner_id = %owner_id,
                    kind = ?kind,
                    amount_paise,
                    balance_paise = entry.balance_after,
                    reference_type = %entry.reference_type,
                    "Wallet debited"
                );
                Ok(entry)
            }
            DebitOutcome::InsufficientBalance { balance_paise } => {
                warn!(
                    owner_id = %owner_id,
                    kind = ?kind,
                    required_paise = amount_paise,
                    available_paise = balance_paise,
                    "Debit refused: insufficient balance"
                );
                Err(WalletError::InsufficientBalance {
                    available_paise: balance_paise,
                    required_paise: amount_paise,
                })
            }
        }
    }

    pub async fn balance(&self, kind: WalletKind, owner_id: &str) -> Result<i64, WalletError> {
        Ok(self.store.balance(kind, owner_id).await?)
    }

    pub async fn ledger(
        &self,
        kind: WalletKind,
        owner_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<WalletLedgerEntry>, WalletError> {
        let limit = limit.unwrap_or(DEFAULT_LEDGER_PAGE).clamp(1, MAX_LEDGER_PAGE);
        Ok(self.store.ledger_entries(kind, owner_id, limit).await?)
    }
}

fn ensure_positive(amount_paise: i64) -> Result<(), WalletError> {
    if amount_paise <= 0 {
        return Err(WalletError::InvalidAmount {
            reason: "amount must be a positive number of paise".to_string(),
        });
    }
    Ok(())
}

impl From<WalletError> for AppError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InsufficientBalance {
                available_paise,
                required_paise,
            } => AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
                available_paise,
                required_paise,
            })),
            WalletError::InvalidAmount { reason } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                    reason,
                }))
            }
            WalletError::Store(db) => AppError::from(db),
        }
    }
}
