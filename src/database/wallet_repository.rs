//! Postgres-backed wallet store.
//!
//! Every balance movement is a read-modify-write inside one transaction, and
//! debits are conditional in SQL (`balance_paise >= amount`), so two racing
//! debits can never spend the same paise twice. The schema backs this up
//! with a CHECK constraint on the balance column.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::error::DatabaseError;
use crate::database::store::{
    DebitOutcome, LedgerDirection, LedgerReference, WalletAccount, WalletKind, WalletLedgerEntry,
    WalletStore,
};

pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletStore for WalletRepository {
    async fn credit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<WalletLedgerEntry, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Accounts come into existence on first touch.
        sqlx::query(
            r#"
            INSERT INTO wallet_accounts (owner_id, kind, balance_paise)
            VALUES ($1, $2, 0)
            ON CONFLICT (owner_id, kind) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_db_str())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let account = sqlx::query_as::<_, WalletAccount>(
            r#"
            UPDATE wallet_accounts
            SET balance_paise = balance_paise + $3, updated_at = NOW()
            WHERE owner_id = $1 AND kind = $2
            RETURNING id, owner_id, kind, balance_paise, created_at, updated_at
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_db_str())
        .bind(amount_paise)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let entry = insert_ledger_entry(
            &mut tx,
            account.id,
            LedgerDirection::Credit,
            amount_paise,
            account.balance_paise - amount_paise,
            account.balance_paise,
            &reference,
        )
        .await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(entry)
    }

    async fn debit(
        &self,
        kind: WalletKind,
        owner_id: &str,
        amount_paise: i64,
        reference: LedgerReference,
    ) -> Result<DebitOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO wallet_accounts (owner_id, kind, balance_paise)
            VALUES ($1, $2, 0)
            ON CONFLICT (owner_id, kind) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_db_str())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        // The balance check and the write are one statement; no row is
        // returned when funds are short.
        let updated = sqlx::query_as::<_, WalletAccount>(
            r#"
            UPDATE wallet_accounts
            SET balance_paise = balance_paise - $3, updated_at = NOW()
            WHERE owner_id = $1 AND kind = $2 AND balance_paise >= $3
            RETURNING id, owner_id, kind, balance_paise, created_at, updated_at
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_db_str())
        .bind(amount_paise)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(account) = updated else {
            let balance_paise: i64 = sqlx::query_scalar(
                "SELECT balance_paise FROM wallet_accounts WHERE owner_id = $1 AND kind = $2",
            )
            .bind(owner_id)
            .bind(kind.as_db_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(DebitOutcome::InsufficientBalance { balance_paise });
        };

        let entry = insert_ledger_entry(
            &mut tx,
            account.id,
            LedgerDirection::Debit,
            amount_paise,
            account.balance_paise + amount_paise,
            account.balance_paise,
            &reference,
        )
        .await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(DebitOutcome::Applied(entry))
    }

    async fn balance(&self, kind: WalletKind, owner_id: &str) -> Result<i64, DatabaseError> {
        let balance: Option<i64> = sqlx::query_scalar(
            "SELECT balance_paise FROM wallet_accounts WHERE owner_id = $1 AND kind = $2",
        )
        .bind(owner_id)
        .bind(kind.as_db_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(balance.unwrap_or(0))
    }

    async fn ledger_entries(
        &self,
        kind: WalletKind,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<WalletLedgerEntry>, DatabaseError> {
        sqlx::query_as::<_, WalletLedgerEntry>(
            r#"
            SELECT e.id, e.account_id, e.direction, e.amount_paise,
                   e.balance_before, e.balance_after, e.reference_id,
                   e.reference_type, e.description, e.created_at
            FROM wallet_ledger_entries e
            JOIN wallet_accounts a ON a.id = e.account_id
            WHERE a.owner_id = $1 AND a.kind = $2
            ORDER BY e.created_at DESC
            LIMIT $3
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_db_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

async fn insert_ledger_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_id: uuid::Uuid,
    direction: LedgerDirection,
    amount_paise: i64,
    balance_before: i64,
    balance_after: i64,
    reference: &LedgerReference,
) -> Result<WalletLedgerEntry, DatabaseError> {
    sqlx::query_as::<_, WalletLedgerEntry>(
        r#"
        INSERT INTO wallet_ledger_entries
            (account_id, direction, amount_paise, balance_before, balance_after,
             reference_id, reference_type, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, account_id, direction, amount_paise, balance_before,
                  balance_after, reference_id, reference_type, description,
                  created_at
        "#,
    )
    .bind(account_id)
    .bind(direction.as_db_str())
    .bind(amount_paise)
    .bind(balance_before)
    .bind(balance_after)
    .bind(&reference.reference_id)
    .bind(&reference.reference_type)
    .bind(&reference.description)
    .fetch_one(&mut **tx)
    .await
    .map_err(DatabaseError::from_sqlx)
}
