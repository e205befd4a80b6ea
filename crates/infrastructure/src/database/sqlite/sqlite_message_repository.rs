use async_trait::async_trait;
use reminder_core::{
    models::{MessageRecord, MessageStatus},
    traits::MessageRepository,
    ReminderError, ReminderResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

pub struct SqliteMessageRepository {
    pool: SqlitePool,
}

impl SqliteMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &SqliteRow, pushed: BTreeSet<String>) -> ReminderResult<MessageRecord> {
        Ok(MessageRecord {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            user_code: row.try_get("user_code")?,
            message_type: row.try_get("message_type")?,
            title: row.try_get("title")?,
            subtitle: row.try_get("subtitle")?,
            content: row.try_get("content")?,
            group: row.try_get("group_name")?,
            url: row.try_get("url")?,
            source: row.try_get("source")?,
            level: row.try_get("level")?,
            tags: MappingHelpers::parse_string_list(row, "tags"),
            extra_data: MappingHelpers::parse_json_value(row, "extra_data")?,
            status: row.try_get("status")?,
            requested_platforms: MappingHelpers::parse_string_list(row, "requested_platforms"),
            pushed_platforms: pushed,
            push_success_count: row.try_get("push_success_count")?,
            push_fail_count: row.try_get("push_fail_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    #[instrument(skip(self, message), fields(message_id = message.id))]
    async fn create(&self, message: &MessageRecord) -> ReminderResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, owner_id, user_code, message_type, title, subtitle, content, group_name,
                url, source, level, tags, extra_data, status, requested_platforms,
                push_success_count, push_fail_count, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.id)
        .bind(message.owner_id)
        .bind(&message.user_code)
        .bind(message.message_type)
        .bind(&message.title)
        .bind(&message.subtitle)
        .bind(&message.content)
        .bind(&message.group)
        .bind(&message.url)
        .bind(&message.source)
        .bind(message.level)
        .bind(MappingHelpers::to_json_text(&message.tags)?)
        .bind(MappingHelpers::to_json_text(&message.extra_data)?)
        .bind(message.status)
        .bind(MappingHelpers::to_json_text(&message.requested_platforms)?)
        .bind(message.push_success_count)
        .bind(message.push_fail_count)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        for platform in &message.pushed_platforms {
            sqlx::query(
                "INSERT OR IGNORE INTO message_pushed_platforms (message_id, platform) VALUES (?, ?)",
            )
            .bind(message.id)
            .bind(platform)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("保存消息成功: ID {}", message.id);
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<MessageRecord>> {
        let Some(row) = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let pushed: Vec<String> = sqlx::query_scalar(
            "SELECT platform FROM message_pushed_platforms WHERE message_id = ?",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Self::row_to_message(&row, pushed.into_iter().collect()).map(Some)
    }

    async fn update_status(&self, id: i64, status: MessageStatus) -> ReminderResult<()> {
        let result = sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ReminderError::MessageNotFound { id });
        }
        Ok(())
    }

    async fn record_delivery(&self, id: i64, platform: &str, success: bool) -> ReminderResult<()> {
        let mut tx = self.pool.begin().await?;

        let counter_sql = if success {
            "UPDATE messages SET push_success_count = push_success_count + 1 WHERE id = ?"
        } else {
            "UPDATE messages SET push_fail_count = push_fail_count + 1 WHERE id = ?"
        };
        let result = sqlx::query(counter_sql).bind(id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(ReminderError::MessageNotFound { id });
        }

        if success {
            sqlx::query(
                "INSERT OR IGNORE INTO message_pushed_platforms (message_id, platform) VALUES (?, ?)",
            )
            .bind(id)
            .bind(platform)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
