use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reminder_core::{
    models::{ScheduledTask, TaskFilter, TaskStatus},
    traits::TaskRepository,
    ReminderError, ReminderResult,
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> ReminderResult<ScheduledTask> {
        Ok(ScheduledTask {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            message_title: row.try_get("message_title")?,
            message_content: row.try_get("message_content")?,
            message_url: row.try_get("message_url")?,
            tags: MappingHelpers::parse_string_list(row, "tags"),
            schedule_type: row.try_get("schedule_type")?,
            cron_expression: row.try_get("cron_expression")?,
            timezone: row.try_get("timezone")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            max_executions: row.try_get("max_executions")?,
            executed_count: row.try_get("executed_count")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, owner_id: i64, filter: &TaskFilter) {
        builder.push(" WHERE owner_id = ");
        builder.push_bind(owner_id);
        if !filter.include_deleted {
            builder.push(" AND deleted_at IS NULL");
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(schedule_type) = filter.schedule_type {
            builder.push(" AND schedule_type = ");
            builder.push_bind(schedule_type.as_str());
        }
        if let Some(keyword) = filter
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            let pattern = format!("%{keyword}%");
            builder.push(" AND (name LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR description LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_id = task.id))]
    async fn create(&self, task: &ScheduledTask) -> ReminderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (
                id, owner_id, name, description, message_title, message_content, message_url,
                tags, schedule_type, cron_expression, timezone, start_date, end_date,
                max_executions, executed_count, status, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id)
        .bind(task.owner_id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.message_title)
        .bind(&task.message_content)
        .bind(&task.message_url)
        .bind(MappingHelpers::to_json_text(&task.tags)?)
        .bind(task.schedule_type)
        .bind(&task.cron_expression)
        .bind(&task.timezone)
        .bind(task.start_date)
        .bind(task.end_date)
        .bind(task.max_executions)
        .bind(task.executed_count)
        .bind(task.status)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.deleted_at)
        .execute(&self.pool)
        .await?;

        debug!("创建任务成功: {} (ID: {})", task.name, task.id);
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<ScheduledTask>> {
        let row = sqlx::query("SELECT * FROM scheduled_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(task_id = task.id))]
    async fn update(&self, task: &ScheduledTask) -> ReminderResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks SET
                name = ?, description = ?, message_title = ?, message_content = ?,
                message_url = ?, tags = ?, schedule_type = ?, cron_expression = ?,
                timezone = ?, start_date = ?, end_date = ?, max_executions = ?,
                status = ?, updated_at = ?, deleted_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.message_title)
        .bind(&task.message_content)
        .bind(&task.message_url)
        .bind(MappingHelpers::to_json_text(&task.tags)?)
        .bind(task.schedule_type)
        .bind(&task.cron_expression)
        .bind(&task.timezone)
        .bind(task.start_date)
        .bind(task.end_date)
        .bind(task.max_executions)
        .bind(task.status)
        .bind(task.updated_at)
        .bind(task.deleted_at)
        .bind(task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReminderError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner_id: i64,
        filter: &TaskFilter,
    ) -> ReminderResult<Vec<ScheduledTask>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM scheduled_tasks");
        Self::push_filter(&mut builder, owner_id, filter);
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(filter.limit);
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn count_by_owner(&self, owner_id: i64, filter: &TaskFilter) -> ReminderResult<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM scheduled_tasks");
        Self::push_filter(&mut builder, owner_id, filter);
        let row = builder.build().fetch_one(&self.pool).await?;
        Ok(row.try_get("total")?)
    }

    async fn list_enabled(&self) -> ReminderResult<Vec<ScheduledTask>> {
        let rows = sqlx::query(
            "SELECT * FROM scheduled_tasks WHERE status = 'enabled' AND deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn increment_executed_count(&self, id: i64) -> ReminderResult<i32> {
        let row = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET executed_count = executed_count + 1, updated_at = ?
            WHERE id = ?
            RETURNING executed_count
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("executed_count")?),
            None => Err(ReminderError::TaskNotFound { id }),
        }
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> ReminderResult<()> {
        let result = sqlx::query("UPDATE scheduled_tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ReminderError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> ReminderResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET status = 'deleted', deleted_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReminderError::TaskNotFound { id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_pool;

    fn task(id: i64, owner: i64, name: &str) -> ScheduledTask {
        ScheduledTask::builder(id, owner, name, "0 0 9 * * *")
            .message("标题", "内容")
            .tags(&["work"])
            .max_executions(3)
            .build()
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let repo = SqliteTaskRepository::new(test_pool().await);
        let mut original = task(1, 100, "喝水");
        repo.create(&original).await.unwrap();

        let loaded = repo.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(loaded.name, "喝水");
        assert_eq!(loaded.tags, vec!["work".to_string()]);
        assert_eq!(loaded.status, TaskStatus::Enabled);

        original.name = "喝水提醒".to_string();
        original.executed_count = 99;
        repo.update(&original).await.unwrap();
        let loaded = repo.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(loaded.name, "喝水提醒");
        // update 不修改执行次数
        assert_eq!(loaded.executed_count, 0);

        assert!(repo.get_by_id(2).await.unwrap().is_none());
        assert!(repo.update(&task(2, 100, "x")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_increment_is_atomic() {
        let repo = std::sync::Arc::new(SqliteTaskRepository::new(test_pool().await));
        repo.create(&task(1, 100, "t")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { repo.increment_executed_count(1).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(repo.get_by_id(1).await.unwrap().unwrap().executed_count, 10);
    }

    #[tokio::test]
    async fn test_filter_and_soft_delete() {
        let repo = SqliteTaskRepository::new(test_pool().await);
        repo.create(&task(1, 100, "早会提醒")).await.unwrap();
        repo.create(&task(2, 100, "喝水")).await.unwrap();
        repo.create(&task(3, 200, "早会提醒")).await.unwrap();

        let filter = TaskFilter {
            keyword: Some("早会".to_string()),
            ..Default::default()
        };
        let found = repo.list_by_owner(100, &filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);

        repo.update_status(2, TaskStatus::Disabled).await.unwrap();
        assert_eq!(repo.list_enabled().await.unwrap().len(), 2);

        repo.soft_delete(1, Utc::now()).await.unwrap();
        let deleted = repo.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(deleted.status, TaskStatus::Deleted);
        assert!(deleted.deleted_at.is_some());
        assert_eq!(repo.count_by_owner(100, &TaskFilter::default()).await.unwrap(), 1);

        let with_deleted = TaskFilter {
            include_deleted: true,
            ..Default::default()
        };
        assert_eq!(repo.count_by_owner(100, &with_deleted).await.unwrap(), 2);
    }
}
