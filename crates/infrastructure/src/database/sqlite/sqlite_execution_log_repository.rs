use async_trait::async_trait;
use reminder_core::{models::ExecutionLogEntry, traits::ExecutionLogRepository, ReminderResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

pub struct SqliteExecutionLogRepository {
    pool: SqlitePool,
}

impl SqliteExecutionLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> ReminderResult<ExecutionLogEntry> {
        Ok(ExecutionLogEntry {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            outcome: row.try_get("outcome")?,
            message_id: row.try_get("message_id")?,
            error_message: row.try_get("error_message")?,
            node_id: row.try_get("node_id")?,
            lock_holder: row.try_get("lock_holder")?,
            duration_ms: row.try_get("duration_ms")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ExecutionLogRepository for SqliteExecutionLogRepository {
    async fn append(&self, entry: &ExecutionLogEntry) -> ReminderResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_execution_logs (
                task_id, scheduled_at, outcome, message_id, error_message,
                node_id, lock_holder, duration_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.task_id)
        .bind(entry.scheduled_at)
        .bind(entry.outcome)
        .bind(entry.message_id)
        .bind(&entry.error_message)
        .bind(&entry.node_id)
        .bind(&entry.lock_holder)
        .bind(entry.duration_ms)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_by_task(
        &self,
        task_id: i64,
        offset: i64,
        limit: i64,
    ) -> ReminderResult<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM task_execution_logs
            WHERE task_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(task_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn count_by_task(&self, task_id: i64) -> ReminderResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM task_execution_logs WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }
}
