use std::sync::Arc;
use tracing::{debug, info};

use reminder_core::{
    config::BackendKind,
    traits::{DistributedLock, MessageQueue, RetryQueue},
    AppConfig, ReminderError, ReminderResult,
};

use crate::{
    database::{DatabaseManager, Repositories},
    lock::{InMemoryLock, RedisLock},
    queue::{InMemoryMessageQueue, InMemoryRetryQueue, RedisRetryQueue, RedisStreamMessageQueue},
    redis_connection::RedisConnectionManager,
};

/// 按配置组装好的基础设施
pub struct Backends {
    pub repositories: Repositories,
    pub lock: Arc<dyn DistributedLock>,
    pub queue: Arc<dyn MessageQueue>,
    pub retry_queue: Arc<dyn RetryQueue>,
    /// `memory://` 部署时为空
    pub database: Option<DatabaseManager>,
}

pub struct BackendFactory;

impl BackendFactory {
    pub async fn create(config: &AppConfig, node_id: &str) -> ReminderResult<Backends> {
        let (repositories, database) = Self::create_repositories(config).await?;

        let redis = if config.uses_redis() {
            info!("Initializing Redis connection: {}", config.redis.url);
            Some(RedisConnectionManager::new(config.redis.clone()).await?)
        } else {
            None
        };

        let lock: Arc<dyn DistributedLock> = match (config.lock.backend, &redis) {
            (BackendKind::Redis, Some(conn)) => Arc::new(RedisLock::new(conn.clone())),
            _ => Arc::new(InMemoryLock::new()),
        };
        debug!("分布式锁后端: {:?}", config.lock.backend);

        let (queue, retry_queue): (Arc<dyn MessageQueue>, Arc<dyn RetryQueue>) =
            match (config.queue.backend, &redis) {
                (BackendKind::Redis, Some(conn)) => (
                    Arc::new(RedisStreamMessageQueue::new(
                        conn.clone(),
                        config.queue.consumer_group.clone(),
                        format!("consumer_{node_id}"),
                        config.queue.poll_interval_millis,
                    )),
                    Arc::new(RedisRetryQueue::new(
                        conn.clone(),
                        config.queue.retry_queue.clone(),
                    )),
                ),
                _ => (
                    Arc::new(InMemoryMessageQueue::new()),
                    Arc::new(InMemoryRetryQueue::new()),
                ),
            };
        debug!("消息队列后端: {:?}", config.queue.backend);

        Ok(Backends {
            repositories,
            lock,
            queue,
            retry_queue,
            database,
        })
    }

    async fn create_repositories(
        config: &AppConfig,
    ) -> ReminderResult<(Repositories, Option<DatabaseManager>)> {
        if config.database.is_memory() {
            info!("Using in-memory repositories");
            return Ok((Repositories::in_memory(), None));
        }

        info!("Initializing SQLite database: {}", config.database.url);
        let manager = DatabaseManager::new(&config.database)
            .await
            .map_err(|e| ReminderError::Configuration(format!("{e:#}")))?;
        manager
            .migrate()
            .await
            .map_err(|e| ReminderError::Internal(format!("{e:#}")))?;
        let repositories = manager.repositories();
        Ok((repositories, Some(manager)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reminder_core::config::DatabaseConfig;

    #[tokio::test]
    async fn test_memory_backends() {
        let config = AppConfig {
            database: DatabaseConfig {
                url: "memory://".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let backends = BackendFactory::create(&config, "node-a").await.unwrap();
        assert!(backends.database.is_none());
        assert_eq!(backends.queue.queue_size("q").await.unwrap(), 0);
        assert_eq!(backends.retry_queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_backends_are_migrated() {
        let config = AppConfig {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let backends = BackendFactory::create(&config, "node-a").await.unwrap();
        assert!(backends.database.is_some());
        assert!(backends
            .repositories
            .tasks
            .list_enabled()
            .await
            .unwrap()
            .is_empty());
    }
}
