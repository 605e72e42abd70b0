//! Append-only audit log of gateway protocol events.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::error::DatabaseError;
use crate::database::store::{EventLogStore, NewEventLogEntry};

pub struct EventLogRepository {
    pool: PgPool,
}

impl EventLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLogStore for EventLogRepository {
    async fn append(&self, entry: NewEventLogEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payment_events (client_txn_id, event_type, raw_payload, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&entry.client_txn_id)
        .bind(entry.event_type.as_db_str())
        .bind(&entry.raw_payload)
        .bind(&entry.message)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
