//! Postgres-backed transaction store.
//!
//! The monotonic status rule lives in the SQL itself: the first UPDATE only
//! matches rows that have not reached SUCCESS, the second only rows that
//! have, and it touches nothing monetary. Concurrent notifications for the
//! same transaction therefore race safely inside the database.

use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;

use crate::database::error::DatabaseError;
use crate::database::store::{
    NewPaymentTransaction, PaymentTransaction, StatusUpdate, StatusUpdateOutcome,
    TransactionStore,
};
use crate::gateway::types::TxnStatus;

pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn create(
        &self,
        new_txn: NewPaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(
            r#"
            INSERT INTO payment_transactions
                (client_txn_id, user_id, amount, status, purpose_tag, purpose_ref,
                 payer_name, payer_email, payer_mobile)
            VALUES ($1, $2, $3, 'INITIATED', $4, $5, $6, $7, $8)
            RETURNING client_txn_id, user_id, amount, paid_amount, status,
                      gateway_txn_id, bank_txn_id, payment_mode, status_code,
                      gateway_message, purpose_tag, purpose_ref, payer_name,
                      payer_email, payer_mobile, created_at, updated_at
            "#,
        )
        .bind(&new_txn.client_txn_id)
        .bind(&new_txn.user_id)
        .bind(&new_txn.amount)
        .bind(&new_txn.purpose_tag)
        .bind(&new_txn.purpose_ref)
        .bind(&new_txn.payer_name)
        .bind(&new_txn.payer_email)
        .bind(&new_txn.payer_mobile)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_client_txn_id(
        &self,
        client_txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT client_txn_id, user_id, amount, paid_amount, status,
                   gateway_txn_id, bank_txn_id, payment_mode, status_code,
                   gateway_message, purpose_tag, purpose_ref, payer_name,
                   payer_email, payer_mobile, created_at, updated_at
            FROM payment_transactions
            WHERE client_txn_id = $1
            "#,
        )
        .bind(client_txn_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn apply_status_update(
        &self,
        client_txn_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<StatusUpdateOutcome>, DatabaseError> {
        // Full update, only for rows that have not reached SUCCESS yet.
        let applied = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            UPDATE payment_transactions
            SET status = $2,
                paid_amount = COALESCE($3, paid_amount),
                gateway_txn_id = COALESCE($4, gateway_txn_id),
                bank_txn_id = COALESCE($5, bank_txn_id),
                payment_mode = COALESCE($6, payment_mode),
                status_code = COALESCE($7, status_code),
                gateway_message = COALESCE($8, gateway_message),
                updated_at = NOW()
            WHERE client_txn_id = $1 AND status <> 'SUCCESS'
            RETURNING client_txn_id, user_id, amount, paid_amount, status,
                      gateway_txn_id, bank_txn_id, payment_mode, status_code,
                      gateway_message, purpose_tag, purpose_ref, payer_name,
                      payer_email, payer_mobile, created_at, updated_at
            "#,
        )
        .bind(client_txn_id)
        .bind(update.status.as_db_str())
        .bind(&update.paid_amount)
        .bind(&update.gateway_txn_id)
        .bind(&update.bank_txn_id)
        .bind(&update.payment_mode)
        .bind(&update.status_code)
        .bind(&update.gateway_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(transaction) = applied {
            let first_success = update.status == TxnStatus::Success;
            return Ok(Some(StatusUpdateOutcome::Applied {
                transaction,
                first_success,
            }));
        }

        // Row is either already SUCCESS or missing. Refresh metadata only;
        // status and paid_amount are immutable once successful.
        let already = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            UPDATE payment_transactions
            SET gateway_txn_id = COALESCE($2, gateway_txn_id),
                bank_txn_id = COALESCE($3, bank_txn_id),
                payment_mode = COALESCE($4, payment_mode),
                status_code = COALESCE($5, status_code),
                gateway_message = COALESCE($6, gateway_message),
                updated_at = NOW()
            WHERE client_txn_id = $1 AND status = 'SUCCESS'
            RETURNING client_txn_id, user_id, amount, paid_amount, status,
                      gateway_txn_id, bank_txn_id, payment_mode, status_code,
                      gateway_message, purpose_tag, purpose_ref, payer_name,
                      payer_email, payer_mobile, created_at, updated_at
            "#,
        )
        .bind(client_txn_id)
        .bind(&update.gateway_txn_id)
        .bind(&update.bank_txn_id)
        .bind(&update.payment_mode)
        .bind(&update.status_code)
        .bind(&update.gateway_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(already.map(|transaction| StatusUpdateOutcome::AlreadySuccessful { transaction }))
    }

    async fn find_stale_unsettled(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        let min_age_minutes = older_than.num_minutes().max(0) as i32;
        sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT client_txn_id, user_id, amount, paid_amount, status,
                   gateway_txn_id, bank_txn_id, payment_mode, status_code,
                   gateway_message, purpose_tag, purpose_ref, payer_name,
                   payer_email, payer_mobile, created_at, updated_at
            FROM payment_transactions
            WHERE status IN ('INITIATED', 'PENDING')
              AND updated_at < NOW() - INTERVAL '1 minute' * $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(min_age_minutes)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
