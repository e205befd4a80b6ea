use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    models::{FanoutJob, RetryJob},
    ReminderResult,
};

/// 队列中的一条扇出任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// 队列内的投递标识，用于确认
    pub id: String,
    pub job: FanoutJob,
    /// 被投递的次数，首次为1
    pub delivery_count: u32,
}

/// 消息队列抽象接口
///
/// 至少一次投递：未确认的任务可能被再次消费，消费者需自行保证幂等。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布扇出任务，返回队列内标识
    async fn publish(&self, queue: &str, job: &FanoutJob) -> ReminderResult<String>;

    /// 最多取出 `max` 条任务，没有任务时返回空
    async fn consume(&self, queue: &str, max: usize) -> ReminderResult<Vec<QueueMessage>>;

    /// 确认消息处理完成
    async fn ack(&self, queue: &str, id: &str) -> ReminderResult<()>;

    /// 拒绝消息，`requeue` 为真时重新入队
    async fn nack(&self, queue: &str, id: &str, requeue: bool) -> ReminderResult<()>;

    /// 获取队列中待处理的消息数量
    async fn queue_size(&self, queue: &str) -> ReminderResult<u64>;

    /// 清空队列
    async fn purge(&self, queue: &str) -> ReminderResult<()>;
}

/// 延迟重投队列
#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn enqueue(&self, job: &RetryJob) -> ReminderResult<()>;

    /// 原子地取出到期任务，同一任务不会被两个节点同时取到
    async fn take_due(&self, now: DateTime<Utc>, max: usize) -> ReminderResult<Vec<RetryJob>>;

    async fn len(&self) -> ReminderResult<u64>;
}
