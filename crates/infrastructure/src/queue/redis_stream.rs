//! 基于Redis Stream的扇出队列
//!
//! 每个队列对应一个Stream，消费者组保证一条消息同一时刻只交给一个消费者。
//! 消费时先取本消费者名下未确认的消息，再取新消息；确认后从Stream删除，
//! 因此 `XLEN` 即为待处理数量。

use async_trait::async_trait;
use redis::streams::StreamReadReply;
use reminder_core::{
    models::FanoutJob,
    traits::{MessageQueue, QueueMessage},
    ReminderError, ReminderResult,
};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::redis_connection::RedisConnectionManager;

const FIELD_DATA: &str = "data";
const FIELD_DELIVERIES: &str = "deliveries";

pub struct RedisStreamMessageQueue {
    connection: RedisConnectionManager,
    group_name: String,
    consumer_id: String,
    block_millis: u64,
    known_groups: Mutex<HashSet<String>>,
}

impl RedisStreamMessageQueue {
    pub fn new(
        connection: RedisConnectionManager,
        group_name: impl Into<String>,
        consumer_id: impl Into<String>,
        block_millis: u64,
    ) -> Self {
        Self {
            connection,
            group_name: group_name.into(),
            consumer_id: consumer_id.into(),
            block_millis,
            known_groups: Mutex::new(HashSet::new()),
        }
    }

    /// 确保消费者组存在
    async fn ensure_consumer_group(&self, stream_key: &str) -> ReminderResult<()> {
        let mut known = self.known_groups.lock().await;
        if known.contains(stream_key) {
            return Ok(());
        }

        let result: ReminderResult<String> = self
            .connection
            .execute_command(
                redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(stream_key)
                    .arg(&self.group_name)
                    .arg("0")
                    .arg("MKSTREAM"),
            )
            .await;

        match result {
            Ok(_) => info!(
                "Created consumer group: {} for stream: {}",
                self.group_name, stream_key
            ),
            Err(e) if e.to_string().contains("BUSYGROUP") => debug!(
                "Consumer group {} already exists for stream {}",
                self.group_name, stream_key
            ),
            Err(e) => {
                return Err(ReminderError::MessageQueue(format!(
                    "Failed to create consumer group {}: {e}",
                    self.group_name
                )))
            }
        }

        known.insert(stream_key.to_string());
        Ok(())
    }

    async fn read_group(
        &self,
        queue: &str,
        max: usize,
        start_id: &str,
        block: bool,
    ) -> ReminderResult<Vec<QueueMessage>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group_name)
            .arg(&self.consumer_id)
            .arg("COUNT")
            .arg(max);
        if block {
            cmd.arg("BLOCK").arg(self.block_millis);
        }
        cmd.arg("STREAMS").arg(queue).arg(start_id);

        let reply: Option<StreamReadReply> = self
            .connection
            .execute_command(&cmd)
            .await
            .map_err(|e| {
                ReminderError::MessageQueue(format!("Failed to consume from queue {queue}: {e}"))
            })?;

        let mut messages = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                let Some(data) = entry.get::<String>(FIELD_DATA) else {
                    // 已删除的条目在待确认列表中只剩ID
                    continue;
                };
                match serde_json::from_str::<FanoutJob>(&data) {
                    Ok(job) => {
                        let previous = entry.get::<u32>(FIELD_DELIVERIES).unwrap_or(0);
                        messages.push(QueueMessage {
                            id: entry.id.clone(),
                            job,
                            delivery_count: previous + 1,
                        });
                    }
                    Err(e) => {
                        warn!("丢弃无法解析的队列消息: id={}, error={}", entry.id, e);
                        self.ack(queue, &entry.id).await?;
                    }
                }
            }
        }
        Ok(messages)
    }

    async fn append(&self, queue: &str, job: &FanoutJob, deliveries: u32) -> ReminderResult<String> {
        let payload = serde_json::to_string(job)?;
        self.connection
            .execute_command(
                redis::cmd("XADD")
                    .arg(queue)
                    .arg("*")
                    .arg(FIELD_DATA)
                    .arg(payload)
                    .arg(FIELD_DELIVERIES)
                    .arg(deliveries),
            )
            .await
            .map_err(|e| ReminderError::MessageQueue(format!("Failed to publish to {queue}: {e}")))
    }
}

#[async_trait]
impl MessageQueue for RedisStreamMessageQueue {
    async fn publish(&self, queue: &str, job: &FanoutJob) -> ReminderResult<String> {
        self.ensure_consumer_group(queue).await?;
        let id = self.append(queue, job, 0).await?;
        debug!("Published message {} to stream {}", id, queue);
        Ok(id)
    }

    async fn consume(&self, queue: &str, max: usize) -> ReminderResult<Vec<QueueMessage>> {
        self.ensure_consumer_group(queue).await?;

        let pending = self.read_group(queue, max, "0", false).await?;
        if !pending.is_empty() {
            debug!("Recovered {} pending messages from {}", pending.len(), queue);
            return Ok(pending);
        }
        self.read_group(queue, max, ">", true).await
    }

    async fn ack(&self, queue: &str, id: &str) -> ReminderResult<()> {
        let _: i64 = self
            .connection
            .execute_command(redis::cmd("XACK").arg(queue).arg(&self.group_name).arg(id))
            .await
            .map_err(|e| ReminderError::MessageQueue(format!("Failed to ack {id}: {e}")))?;
        let _: i64 = self
            .connection
            .execute_command(redis::cmd("XDEL").arg(queue).arg(id))
            .await
            .map_err(|e| ReminderError::MessageQueue(format!("Failed to delete {id}: {e}")))?;
        Ok(())
    }

    async fn nack(&self, queue: &str, id: &str, requeue: bool) -> ReminderResult<()> {
        if requeue {
            let reply: redis::streams::StreamRangeReply = self
                .connection
                .execute_command(redis::cmd("XRANGE").arg(queue).arg(id).arg(id))
                .await
                .map_err(|e| ReminderError::MessageQueue(format!("Failed to read {id}: {e}")))?;

            if let Some(entry) = reply.ids.first() {
                let data: Option<String> = entry.get(FIELD_DATA);
                let deliveries: u32 = entry.get(FIELD_DELIVERIES).unwrap_or(0);
                if let Some(data) = data {
                    let job: FanoutJob = serde_json::from_str(&data)?;
                    self.append(queue, &job, deliveries + 1).await?;
                }
            }
        }
        self.ack(queue, id).await
    }

    async fn queue_size(&self, queue: &str) -> ReminderResult<u64> {
        self.connection
            .execute_command(redis::cmd("XLEN").arg(queue))
            .await
            .map_err(|e| ReminderError::MessageQueue(e.to_string()))
    }

    async fn purge(&self, queue: &str) -> ReminderResult<()> {
        let _: i64 = self
            .connection
            .execute_command(redis::cmd("DEL").arg(queue))
            .await
            .map_err(|e| ReminderError::MessageQueue(e.to_string()))?;
        self.known_groups.lock().await.remove(queue);
        Ok(())
    }
}
