use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use reminder_core::{
    models::RetryJob,
    traits::{DestinationRepository, MessageRepository, RetryQueue},
    ReminderResult,
};

use crate::fanout::FanoutProcessor;

/// 一个重试任务的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Delivered,
    Requeued,
    /// 次数用尽、消息或目标不存在、目标已停用、或此前已成功
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryRound {
    pub taken: usize,
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// 轮询重试队列，重新发送到期的失败投递
pub struct RetryWorker {
    processor: Arc<FanoutProcessor>,
    retry_queue: Arc<dyn RetryQueue>,
    messages: Arc<dyn MessageRepository>,
    destinations: Arc<dyn DestinationRepository>,
    poll_interval: Duration,
    batch_size: usize,
}

impl RetryWorker {
    pub fn new(
        processor: Arc<FanoutProcessor>,
        retry_queue: Arc<dyn RetryQueue>,
        messages: Arc<dyn MessageRepository>,
        destinations: Arc<dyn DestinationRepository>,
        poll_interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            processor,
            retry_queue,
            messages,
            destinations,
            poll_interval,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run_once(&self) -> ReminderResult<RetryRound> {
        let jobs = self
            .retry_queue
            .take_due(self.processor.now(), self.batch_size)
            .await?;
        let mut round = RetryRound {
            taken: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            let disposition = match self.handle(&job).await {
                Ok(disposition) => disposition,
                Err(e) => {
                    // 已从队列取出，原样放回等下一轮
                    error!(
                        "处理重试任务失败: message_id={}, destination_id={}, error={}",
                        job.message_id, job.destination_id, e
                    );
                    let again = RetryJob {
                        due_at: self.processor.now() + self.processor.settings().retry_delay,
                        ..job.clone()
                    };
                    match self.retry_queue.enqueue(&again).await {
                        Ok(()) => RetryDisposition::Requeued,
                        Err(e) => {
                            error!(
                                "重试任务放回队列失败，任务丢失: message_id={}, destination_id={}, retry_count={}, error={}",
                                job.message_id, job.destination_id, job.retry_count, e
                            );
                            RetryDisposition::Dropped
                        }
                    }
                }
            };
            match disposition {
                RetryDisposition::Delivered => round.delivered += 1,
                RetryDisposition::Requeued => round.requeued += 1,
                RetryDisposition::Dropped => round.dropped += 1,
            }
        }

        if round.taken > 0 {
            info!(
                "重试轮次完成: taken={}, delivered={}, requeued={}, dropped={}",
                round.taken, round.delivered, round.requeued, round.dropped
            );
        }
        Ok(round)
    }

    async fn handle(&self, job: &RetryJob) -> ReminderResult<RetryDisposition> {
        let Some(message) = self.messages.get_by_id(job.message_id).await? else {
            warn!("重试的消息不存在，放弃: message_id={}", job.message_id);
            return Ok(RetryDisposition::Dropped);
        };
        let destination = match self.destinations.get_by_id(job.destination_id).await? {
            Some(d) if d.enabled => d,
            _ => {
                warn!(
                    "推送目标已删除或停用，放弃重试: message_id={}, destination_id={}",
                    job.message_id, job.destination_id
                );
                return Ok(RetryDisposition::Dropped);
            }
        };
        if self
            .processor
            .already_delivered(message.id, destination.id)
            .await?
        {
            debug!(
                "目标已投递成功，跳过重试: message_id={}, destination_id={}",
                message.id, destination.id
            );
            return Ok(RetryDisposition::Dropped);
        }

        let attempt_no = job.retry_count + 1;
        let success = self
            .processor
            .send_and_record(&message, &destination, attempt_no)
            .await?;

        if success {
            self.messages
                .record_delivery(message.id, &destination.platform, true)
                .await?;
            return Ok(RetryDisposition::Delivered);
        }

        let max_attempts = i32::try_from(self.processor.settings().max_retry_attempts).unwrap_or(i32::MAX);
        if attempt_no < max_attempts {
            let next = job.next(self.processor.now(), self.processor.settings().retry_delay);
            self.processor.schedule_retry(&next).await?;
            Ok(RetryDisposition::Requeued)
        } else {
            warn!(
                "重试次数已用尽，放弃推送: message_id={}, destination_id={}, attempts={}",
                message.id, destination.id, attempt_no
            );
            Ok(RetryDisposition::Dropped)
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("重试工作器启动，轮询间隔: {:?}", self.poll_interval);
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("重试轮询失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("重试工作器收到关闭信号");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::test_support::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use reminder_core::models::{DeliveryStatus, MessageRecord, MessageStatus, PlatformKind};
    use reminder_core::traits::Clock;
    use reminder_core::ReminderError;
    use reminder_infrastructure::testing::{sample_destination, sample_message};
    use reminder_infrastructure::InMemoryRetryQueue;

    /// 取任务正常，放回总是失败
    struct RejectingRetryQueue {
        inner: InMemoryRetryQueue,
    }

    #[async_trait]
    impl RetryQueue for RejectingRetryQueue {
        async fn enqueue(&self, _job: &RetryJob) -> ReminderResult<()> {
            Err(ReminderError::MessageQueue("连接已断开".to_string()))
        }
        async fn take_due(&self, now: DateTime<Utc>, max: usize) -> ReminderResult<Vec<RetryJob>> {
            self.inner.take_due(now, max).await
        }
        async fn len(&self) -> ReminderResult<u64> {
            self.inner.len().await
        }
    }

    struct UnavailableMessages;

    #[async_trait]
    impl MessageRepository for UnavailableMessages {
        async fn create(&self, _message: &MessageRecord) -> ReminderResult<()> {
            Ok(())
        }
        async fn get_by_id(&self, _id: i64) -> ReminderResult<Option<MessageRecord>> {
            Err(ReminderError::Internal("存储不可用".to_string()))
        }
        async fn update_status(&self, _id: i64, _status: MessageStatus) -> ReminderResult<()> {
            Ok(())
        }
        async fn record_delivery(&self, _id: i64, _platform: &str, _success: bool) -> ReminderResult<()> {
            Ok(())
        }
    }

    async fn setup(sender: Arc<FakeSender>) -> (Harness, RetryWorker) {
        let h = harness(vec![sender]);
        h.repos.messages.create(&sample_message(1, 100)).await.unwrap();
        h.repos
            .destinations
            .save(&sample_destination(1, 100, "bark"))
            .await
            .unwrap();
        let worker = RetryWorker::new(
            h.processor.clone(),
            h.retry_queue.clone(),
            h.repos.messages.clone(),
            h.repos.destinations.clone(),
            Duration::from_secs(30),
            10,
        );
        (h, worker)
    }

    #[tokio::test]
    async fn test_retry_waits_until_due_then_delivers() {
        let bark = FakeSender::new(PlatformKind::Bark, false);
        let (h, worker) = setup(bark.clone()).await;
        let message = h.repos.messages.get_by_id(1).await.unwrap().unwrap();
        h.processor.process(&message).await.unwrap();

        assert_eq!(worker.run_once().await.unwrap().taken, 0);

        bark.set_succeed(true);
        h.clock.advance(ChronoDuration::minutes(5));
        let round = worker.run_once().await.unwrap();
        assert_eq!(round.delivered, 1);

        let stored = h.repos.messages.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.push_fail_count, 1);
        assert_eq!(stored.push_success_count, 1);
        assert!(stored.pushed_platforms.contains("bark"));

        let attempts = h.repos.delivery_attempts.list_by_message(1).await.unwrap();
        let retried = attempts.iter().find(|a| a.retry_count == 1).unwrap();
        assert_eq!(retried.status, DeliveryStatus::Success);
        assert_eq!(h.retry_queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let bark = FakeSender::new(PlatformKind::Bark, false);
        let (h, worker) = setup(bark.clone()).await;
        let message = h.repos.messages.get_by_id(1).await.unwrap().unwrap();
        h.processor.process(&message).await.unwrap();

        let mut rounds = Vec::new();
        for _ in 0..4 {
            h.clock.advance(ChronoDuration::minutes(5));
            rounds.push(worker.run_once().await.unwrap());
        }

        assert_eq!(rounds[0].requeued, 1);
        assert_eq!(rounds[1].requeued, 1);
        assert_eq!(rounds[2].dropped, 1);
        assert_eq!(rounds[3].taken, 0);
        // 首次发送加3次重试
        assert_eq!(bark.calls(), 4);

        let stored = h.repos.messages.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.push_fail_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_destination_is_dropped() {
        let bark = FakeSender::new(PlatformKind::Bark, false);
        let (h, worker) = setup(bark.clone()).await;
        let message = h.repos.messages.get_by_id(1).await.unwrap().unwrap();
        h.processor.process(&message).await.unwrap();

        let mut destination = sample_destination(1, 100, "bark");
        destination.enabled = false;
        h.repos.destinations.save(&destination).await.unwrap();

        h.clock.advance(ChronoDuration::minutes(5));
        let round = worker.run_once().await.unwrap();
        assert_eq!(round.dropped, 1);
        assert_eq!(bark.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_requeue_still_handles_rest_of_batch() {
        let bark = FakeSender::new(PlatformKind::Bark, false);
        let h = harness(vec![bark.clone()]);
        let inner = InMemoryRetryQueue::new();
        for destination_id in 1..=3 {
            let job = RetryJob::new(1, destination_id, "bark", h.clock.now(), ChronoDuration::zero());
            inner.enqueue(&job).await.unwrap();
        }
        let worker = RetryWorker::new(
            h.processor.clone(),
            Arc::new(RejectingRetryQueue { inner }),
            Arc::new(UnavailableMessages),
            h.repos.destinations.clone(),
            Duration::from_secs(30),
            10,
        );

        let round = worker.run_once().await.unwrap();
        assert_eq!(round.taken, 3);
        assert_eq!(round.dropped, 3);
        assert_eq!(round.requeued, 0);
        assert_eq!(bark.calls(), 0);
    }
}
