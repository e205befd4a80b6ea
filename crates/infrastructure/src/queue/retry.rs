use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reminder_core::{models::RetryJob, traits::RetryQueue, ReminderError, ReminderResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::redis_connection::RedisConnectionManager;

/// 内存重试队列，按到期时间排序
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetryQueue {
    jobs: Arc<Mutex<BTreeMap<(i64, u64), RetryJob>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<RetryJob> {
        self.jobs.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn enqueue(&self, job: &RetryJob) -> ReminderResult<()> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.jobs
            .lock()
            .await
            .insert((job.due_at.timestamp_millis(), seq), job.clone());
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>, max: usize) -> ReminderResult<Vec<RetryJob>> {
        let mut jobs = self.jobs.lock().await;
        let due_keys: Vec<_> = jobs
            .range(..=(now.timestamp_millis(), u64::MAX))
            .take(max)
            .map(|(key, _)| *key)
            .collect();
        Ok(due_keys
            .into_iter()
            .filter_map(|key| jobs.remove(&key))
            .collect())
    }

    async fn len(&self) -> ReminderResult<u64> {
        Ok(self.jobs.lock().await.len() as u64)
    }
}

/// 取出并删除到期成员，在一个脚本内完成，多节点不会取到同一任务
const TAKE_DUE_SCRIPT: &str = r#"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
if #items > 0 then
    redis.call('ZREM', KEYS[1], unpack(items))
end
return items
"#;

/// 基于有序集合的重试队列，分数为到期毫秒时间戳
pub struct RedisRetryQueue {
    connection: RedisConnectionManager,
    key: String,
}

impl RedisRetryQueue {
    pub fn new(connection: RedisConnectionManager, key: impl Into<String>) -> Self {
        Self {
            connection,
            key: key.into(),
        }
    }
}

#[async_trait]
impl RetryQueue for RedisRetryQueue {
    async fn enqueue(&self, job: &RetryJob) -> ReminderResult<()> {
        let member = serde_json::to_string(job)?;
        let _: i64 = self
            .connection
            .execute_command(
                redis::cmd("ZADD")
                    .arg(&self.key)
                    .arg(job.due_at.timestamp_millis())
                    .arg(member),
            )
            .await
            .map_err(|e| ReminderError::MessageQueue(format!("重试任务入队失败: {e}")))?;
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>, max: usize) -> ReminderResult<Vec<RetryJob>> {
        let mut conn = self.connection.connection();
        let members: Vec<String> = redis::Script::new(TAKE_DUE_SCRIPT)
            .key(&self.key)
            .arg(now.timestamp_millis())
            .arg(max)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ReminderError::MessageQueue(format!("读取重试任务失败: {e}")))?;

        let mut jobs = Vec::with_capacity(members.len());
        for member in members {
            match serde_json::from_str::<RetryJob>(&member) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!("丢弃无法解析的重试任务: {}", e),
            }
        }
        Ok(jobs)
    }

    async fn len(&self) -> ReminderResult<u64> {
        self.connection
            .execute_command(redis::cmd("ZCARD").arg(&self.key))
            .await
            .map_err(|e| ReminderError::MessageQueue(e.to_string()))
    }
}
