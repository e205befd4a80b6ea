use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use reminder_core::{traits::MessageQueue, ReminderResult};

use crate::fanout::FanoutProcessor;

/// 同一扇出任务的最大投递次数，超过后不再重新入队
pub const MAX_DELIVERIES: u32 = 5;

/// 扇出队列消费者
///
/// 处理成功后确认；失败时拒绝并重新入队，由其他消费者或下一轮再处理。
pub struct FanoutConsumer {
    name: String,
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
    processor: Arc<FanoutProcessor>,
    batch_size: usize,
    poll_interval: Duration,
}

impl FanoutConsumer {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn MessageQueue>,
        queue_name: impl Into<String>,
        processor: Arc<FanoutProcessor>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            queue_name: queue_name.into(),
            processor,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// 取一批任务处理，返回取到的数量
    pub async fn poll_once(&self) -> ReminderResult<usize> {
        let batch = self.queue.consume(&self.queue_name, self.batch_size).await?;
        let count = batch.len();

        for item in batch {
            let message_id = item.job.message_id();
            match self.processor.process(&item.job.message).await {
                Ok(_) => self.queue.ack(&self.queue_name, &item.id).await?,
                Err(e) => {
                    let requeue = item.delivery_count < MAX_DELIVERIES;
                    if requeue {
                        warn!(
                            "扇出处理失败，重新入队: consumer={}, message_id={}, deliveries={}, error={}",
                            self.name, message_id, item.delivery_count, e
                        );
                    } else {
                        error!(
                            "扇出处理多次失败，丢弃任务: consumer={}, message_id={}, error={}",
                            self.name, message_id, e
                        );
                    }
                    self.queue.nack(&self.queue_name, &item.id, requeue).await?;
                }
            }
        }

        if count > 0 {
            debug!("消费者 {} 处理了 {} 个扇出任务", self.name, count);
        }
        Ok(count)
    }

    /// 正在处理的批次不会被关闭信号打断
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("扇出消费者启动: {} 队列: {}", self.name, self.queue_name);

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(count) => count == 0,
                Err(e) => {
                    error!("消费扇出队列失败: consumer={}, error={}", self.name, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        }

        info!("扇出消费者已停止: {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::test_support::*;
    use reminder_core::models::{FanoutJob, PlatformKind};
    use reminder_infrastructure::testing::{sample_destination, sample_message};
    use reminder_infrastructure::InMemoryMessageQueue;

    const QUEUE: &str = "message:push:queue";

    async fn setup() -> (Harness, Arc<InMemoryMessageQueue>, FanoutConsumer) {
        let h = harness(vec![FakeSender::new(PlatformKind::Bark, true)]);
        h.repos
            .destinations
            .save(&sample_destination(1, 100, "bark"))
            .await
            .unwrap();
        let queue = Arc::new(InMemoryMessageQueue::new());
        let consumer = FanoutConsumer::new(
            "consumer-0",
            queue.clone(),
            QUEUE,
            h.processor.clone(),
            10,
            Duration::from_millis(50),
        );
        (h, queue, consumer)
    }

    #[tokio::test]
    async fn test_processed_job_is_acked() {
        let (h, queue, consumer) = setup().await;
        let message = sample_message(1, 100);
        h.repos.messages.create(&message).await.unwrap();
        queue.publish(QUEUE, &FanoutJob::new(message)).await.unwrap();

        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(queue.in_flight_count(QUEUE).await, 0);
        assert_eq!(queue.queue_size(QUEUE).await.unwrap(), 0);
        assert_eq!(
            h.repos.delivery_attempts.list_by_message(1).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_job_is_requeued() {
        let (_h, queue, consumer) = setup().await;
        // 消息未落库，记录计数时报错
        queue
            .publish(QUEUE, &FanoutJob::new(sample_message(2, 100)))
            .await
            .unwrap();

        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(queue.in_flight_count(QUEUE).await, 0);
        assert_eq!(queue.queue_size(QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_h, _queue, consumer) = setup().await;
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { consumer.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawned_consumer_delivers_job() {
        let (h, queue, consumer) = setup().await;
        let message = sample_message(3, 100);
        h.repos.messages.create(&message).await.unwrap();
        queue.publish(QUEUE, &FanoutJob::new(message)).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { consumer.run(rx).await });

        let delivered = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = h.repos.messages.get_by_id(3).await.unwrap().unwrap();
                if stored.push_success_count == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(delivered.is_ok());
        assert_eq!(queue.queue_size(QUEUE).await.unwrap(), 0);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
