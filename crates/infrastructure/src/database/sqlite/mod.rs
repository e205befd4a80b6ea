pub mod sqlite_delivery_repository;
pub mod sqlite_destination_repository;
pub mod sqlite_execution_log_repository;
pub mod sqlite_message_repository;
pub mod sqlite_task_repository;
pub mod sqlite_user_repository;

pub use sqlite_delivery_repository::SqliteDeliveryAttemptRepository;
pub use sqlite_destination_repository::{SqliteDestinationRepository, SqliteTagRouteRepository};
pub use sqlite_execution_log_repository::SqliteExecutionLogRepository;
pub use sqlite_message_repository::SqliteMessageRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_user_repository::SqliteUserRepository;

use anyhow::{Context, Result};
use reminder_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::Repositories;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL,
        user_key TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id INTEGER PRIMARY KEY,
        owner_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        message_title TEXT NOT NULL,
        message_content TEXT NOT NULL,
        message_url TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        schedule_type TEXT NOT NULL,
        cron_expression TEXT NOT NULL,
        timezone TEXT NOT NULL DEFAULT 'Asia/Shanghai',
        start_date TEXT,
        end_date TEXT,
        max_executions INTEGER NOT NULL DEFAULT -1,
        executed_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'enabled',
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        deleted_at DATETIME
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_execution_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        scheduled_at DATETIME NOT NULL,
        outcome TEXT NOT NULL,
        message_id INTEGER,
        error_message TEXT,
        node_id TEXT NOT NULL,
        lock_holder TEXT,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY,
        owner_id INTEGER NOT NULL,
        user_code TEXT NOT NULL,
        message_type TEXT NOT NULL,
        title TEXT NOT NULL,
        subtitle TEXT,
        content TEXT NOT NULL,
        group_name TEXT,
        url TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT '',
        level TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]',
        extra_data TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        requested_platforms TEXT NOT NULL DEFAULT '[]',
        push_success_count INTEGER NOT NULL DEFAULT 0,
        push_fail_count INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS message_pushed_platforms (
        message_id INTEGER NOT NULL,
        platform TEXT NOT NULL,
        PRIMARY KEY (message_id, platform)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_attempts (
        id INTEGER PRIMARY KEY,
        message_id INTEGER NOT NULL,
        destination_id INTEGER NOT NULL,
        owner_id INTEGER NOT NULL,
        platform TEXT NOT NULL,
        config_name TEXT NOT NULL,
        status TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        request_data TEXT,
        response_data TEXT,
        error_message TEXT,
        pushed_at DATETIME,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS push_destinations (
        id INTEGER PRIMARY KEY,
        owner_id INTEGER NOT NULL,
        platform TEXT NOT NULL,
        name TEXT NOT NULL,
        config TEXT NOT NULL DEFAULT '{}',
        enabled INTEGER NOT NULL DEFAULT 1,
        sort_order INTEGER NOT NULL DEFAULT 0,
        remark TEXT,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tag_routes (
        id INTEGER PRIMARY KEY,
        owner_id INTEGER NOT NULL,
        tag_name TEXT NOT NULL,
        destination_ids TEXT NOT NULL DEFAULT '[]',
        enabled INTEGER NOT NULL DEFAULT 1,
        remark TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_owner ON scheduled_tasks(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON scheduled_tasks(status)",
    "CREATE INDEX IF NOT EXISTS idx_logs_task ON task_execution_logs(task_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_owner ON messages(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_attempts_message ON delivery_attempts(message_id, destination_id)",
    "CREATE INDEX IF NOT EXISTS idx_destinations_owner ON push_destinations(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_tag_routes_owner ON tag_routes(owner_id, tag_name)",
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:");
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的SQLite地址: {}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            });

        // 内存库每个连接各自独立，只能用单连接且不回收
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .context("连接SQLite数据库失败")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 运行数据库迁移，可重复执行
    pub async fn migrate(&self) -> Result<()> {
        debug!("Running SQLite database migrations");
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("执行数据库迁移失败")?;
        }
        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn repositories(&self) -> Repositories {
        let pool = self.pool.clone();
        Repositories {
            tasks: Arc::new(SqliteTaskRepository::new(pool.clone())),
            execution_logs: Arc::new(SqliteExecutionLogRepository::new(pool.clone())),
            messages: Arc::new(SqliteMessageRepository::new(pool.clone())),
            delivery_attempts: Arc::new(SqliteDeliveryAttemptRepository::new(pool.clone())),
            destinations: Arc::new(SqliteDestinationRepository::new(pool.clone())),
            tag_routes: Arc::new(SqliteTagRouteRepository::new(pool.clone())),
            users: Arc::new(SqliteUserRepository::new(pool)),
        }
    }
}

pub type DbPool = Pool<Sqlite>;

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    manager.pool().clone()
}
