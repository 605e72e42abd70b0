//! Gold subscription entitlements.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::error::DatabaseError;
use crate::database::store::SubscriptionStore;

pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for SubscriptionRepository {
    async fn activate(
        &self,
        user_id: &str,
        plan_ref: &str,
        source_txn_id: &str,
        valid_for_days: i64,
    ) -> Result<(), DatabaseError> {
        // One activation per funding transaction; replayed settlements no-op.
        sqlx::query(
            r#"
            INSERT INTO gold_subscriptions
                (user_id, plan_ref, source_txn_id, activated_at, expires_at)
            VALUES ($1, $2, $3, NOW(), NOW() + INTERVAL '1 day' * $4)
            ON CONFLICT (source_txn_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(plan_ref)
        .bind(source_txn_id)
        .bind(valid_for_days as i32)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
