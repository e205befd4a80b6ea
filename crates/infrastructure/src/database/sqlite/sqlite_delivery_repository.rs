use async_trait::async_trait;
use reminder_core::{
    models::DeliveryAttempt, traits::DeliveryAttemptRepository, ReminderResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

pub struct SqliteDeliveryAttemptRepository {
    pool: SqlitePool,
}

impl SqliteDeliveryAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_attempt(row: &SqliteRow) -> ReminderResult<DeliveryAttempt> {
        Ok(DeliveryAttempt {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            destination_id: row.try_get("destination_id")?,
            owner_id: row.try_get("owner_id")?,
            platform: row.try_get("platform")?,
            config_name: row.try_get("config_name")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            request_data: row.try_get("request_data")?,
            response_data: row.try_get("response_data")?,
            error_message: row.try_get("error_message")?,
            pushed_at: row.try_get("pushed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DeliveryAttemptRepository for SqliteDeliveryAttemptRepository {
    async fn append(&self, attempt: &DeliveryAttempt) -> ReminderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_attempts (
                id, message_id, destination_id, owner_id, platform, config_name, status,
                retry_count, request_data, response_data, error_message, pushed_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.message_id)
        .bind(attempt.destination_id)
        .bind(attempt.owner_id)
        .bind(&attempt.platform)
        .bind(&attempt.config_name)
        .bind(attempt.status)
        .bind(attempt.retry_count)
        .bind(&attempt.request_data)
        .bind(&attempt.response_data)
        .bind(&attempt.error_message)
        .bind(attempt.pushed_at)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_success(&self, message_id: i64, destination_id: i64) -> ReminderResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM delivery_attempts
            WHERE message_id = ? AND destination_id = ? AND status = 'success'
            LIMIT 1
            "#,
        )
        .bind(message_id)
        .bind(destination_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn has_first_attempt(&self, message_id: i64, destination_id: i64) -> ReminderResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM delivery_attempts
            WHERE message_id = ? AND destination_id = ? AND retry_count = 0
            LIMIT 1
            "#,
        )
        .bind(message_id)
        .bind(destination_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn list_by_message(&self, message_id: i64) -> ReminderResult<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            "SELECT * FROM delivery_attempts WHERE message_id = ? ORDER BY created_at, id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_attempt).collect()
    }
}
