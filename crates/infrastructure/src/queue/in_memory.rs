use async_trait::async_trait;
use reminder_core::{
    models::FanoutJob,
    traits::{MessageQueue, QueueMessage},
    ReminderError, ReminderResult,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueMessage>,
    /// 已取出未确认
    in_flight: HashMap<String, QueueMessage>,
}

/// 内存消息队列实现
///
/// 单进程部署和测试使用，语义与Redis Stream实现一致：取出后需确认，
/// 拒绝时可以重新入队。
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageQueue {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn in_flight_count(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |state| state.in_flight.len())
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, queue: &str, job: &FanoutJob) -> ReminderResult<String> {
        let id = format!("mem-{}", self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default().pending.push_back(QueueMessage {
            id: id.clone(),
            job: job.clone(),
            delivery_count: 0,
        });
        debug!("Published message {} to in-memory queue {}", id, queue);
        Ok(id)
    }

    async fn consume(&self, queue: &str, max: usize) -> ReminderResult<Vec<QueueMessage>> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut taken = Vec::new();
        while taken.len() < max {
            let Some(mut message) = state.pending.pop_front() else {
                break;
            };
            message.delivery_count += 1;
            state.in_flight.insert(message.id.clone(), message.clone());
            taken.push(message);
        }
        Ok(taken)
    }

    async fn ack(&self, queue: &str, id: &str) -> ReminderResult<()> {
        let mut queues = self.queues.lock().await;
        queues
            .get_mut(queue)
            .and_then(|state| state.in_flight.remove(id))
            .map(|_| ())
            .ok_or_else(|| ReminderError::MessageQueue(format!("消息不存在或已确认: {id}")))
    }

    async fn nack(&self, queue: &str, id: &str, requeue: bool) -> ReminderResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| ReminderError::MessageQueue(format!("队列不存在: {queue}")))?;
        let message = state
            .in_flight
            .remove(id)
            .ok_or_else(|| ReminderError::MessageQueue(format!("消息不存在或已确认: {id}")))?;
        if requeue {
            state.pending.push_back(message);
        }
        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> ReminderResult<u64> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map_or(0, |state| (state.pending.len() + state.in_flight.len()) as u64))
    }

    async fn purge(&self, queue: &str) -> ReminderResult<()> {
        self.queues.lock().await.remove(queue);
        Ok(())
    }
}
