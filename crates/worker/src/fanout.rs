use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use reminder_core::{
    config::FanoutConfig,
    models::{DeliveryAttempt, Destination, MessageRecord, RetryJob},
    traits::{Clock, DeliveryAttemptRepository, DestinationRepository, MessageRepository, RetryQueue},
    IdGenerator, ReminderResult,
};
use reminder_infrastructure::{MetricsCollector, StructuredLogger};

use crate::router::{restrict_platforms, FanoutRouter};
use crate::senders::SenderRegistry;

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub max_parallel_sends: usize,
    pub retry_delay: chrono::Duration,
    pub max_retry_attempts: u32,
}

impl FanoutSettings {
    pub fn from_config(config: &FanoutConfig) -> Self {
        Self {
            max_parallel_sends: config.max_parallel_sends.max(1),
            retry_delay: chrono::Duration::seconds(config.retry_delay_seconds as i64),
            max_retry_attempts: config.max_retry_attempts,
        }
    }
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self::from_config(&FanoutConfig::default())
    }
}

/// 一条消息的扇出结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub targeted: usize,
    /// 此前已投递成功而跳过的目标
    pub already_delivered: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// 扇出处理：解析目标、逐个发送、记录投递并安排重试
///
/// 同一扇出任务可能被重复投递，已有成功记录的目标不会再次发送。
pub struct FanoutProcessor {
    destinations: Arc<dyn DestinationRepository>,
    router: FanoutRouter,
    senders: Arc<SenderRegistry>,
    messages: Arc<dyn MessageRepository>,
    attempts: Arc<dyn DeliveryAttemptRepository>,
    retry_queue: Arc<dyn RetryQueue>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    settings: FanoutSettings,
}

impl FanoutProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        destinations: Arc<dyn DestinationRepository>,
        router: FanoutRouter,
        senders: Arc<SenderRegistry>,
        messages: Arc<dyn MessageRepository>,
        attempts: Arc<dyn DeliveryAttemptRepository>,
        retry_queue: Arc<dyn RetryQueue>,
        ids: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        settings: FanoutSettings,
    ) -> Self {
        Self {
            destinations,
            router,
            senders,
            messages,
            attempts,
            retry_queue,
            ids,
            clock,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &FanoutSettings {
        &self.settings
    }

    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// 启用的目标 → 标签路由 → 请求指定的平台子集
    pub async fn resolve_targets(&self, message: &MessageRecord) -> ReminderResult<Vec<Destination>> {
        let enabled = self
            .destinations
            .list_enabled_by_owner(message.owner_id)
            .await?;
        let routed = self.router.filter(message, enabled).await?;
        Ok(restrict_platforms(&message.requested_platforms, routed))
    }

    pub async fn process(&self, message: &MessageRecord) -> ReminderResult<FanoutReport> {
        let targets = self.resolve_targets(message).await?;
        let mut report = FanoutReport {
            targeted: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            info!("没有可用的推送目标: message_id={}", message.id);
            return Ok(report);
        }

        // 先装箱再入流，spawn出去的消费者循环才能满足Send
        let deliveries: Vec<_> = targets
            .iter()
            .map(|destination| Box::pin(self.deliver_first(message, destination)))
            .collect();
        let results: Vec<_> = stream::iter(deliveries)
            .buffer_unordered(self.settings.max_parallel_sends)
            .collect()
            .await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(None) => report.already_delivered += 1,
                Ok(Some(true)) => report.succeeded += 1,
                Ok(Some(false)) => report.failed += 1,
                Err(e) => {
                    error!("记录投递结果失败: message_id={}, error={}", message.id, e);
                    report.failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(
            "消息扇出完成: message_id={}, targeted={}, succeeded={}, failed={}, skipped={}",
            message.id, report.targeted, report.succeeded, report.failed, report.already_delivered
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// 首次投递；已经投递过一次时返回 `None`，后续重发交给重试队列
    async fn deliver_first(
        &self,
        message: &MessageRecord,
        destination: &Destination,
    ) -> ReminderResult<Option<bool>> {
        if self
            .attempts
            .has_first_attempt(message.id, destination.id)
            .await?
        {
            debug!(
                "目标已投递过，跳过: message_id={}, destination_id={}",
                message.id, destination.id
            );
            return Ok(None);
        }

        let success = self.send_and_record(message, destination, 0).await?;
        self.messages
            .record_delivery(message.id, &destination.platform, success)
            .await?;
        if !success {
            let job = RetryJob::new(
                message.id,
                destination.id,
                destination.platform.clone(),
                self.clock.now(),
                self.settings.retry_delay,
            );
            self.schedule_retry(&job).await?;
        }
        Ok(Some(success))
    }

    pub(crate) async fn already_delivered(&self, message_id: i64, destination_id: i64) -> ReminderResult<bool> {
        self.attempts.has_success(message_id, destination_id).await
    }

    /// 发送一次并追加投递记录，不修改消息计数
    pub(crate) async fn send_and_record(
        &self,
        message: &MessageRecord,
        destination: &Destination,
        retry_count: i32,
    ) -> ReminderResult<bool> {
        let started = Instant::now();
        let outcome = self.senders.send(message, destination).await;
        let success = outcome.is_success();

        self.metrics.record_delivery(
            &destination.platform,
            success,
            started.elapsed().as_secs_f64(),
        );
        StructuredLogger::log_delivery_attempted(
            message.id,
            destination.id,
            &destination.platform,
            success,
            retry_count,
            outcome.error.as_deref(),
        );

        let attempt = DeliveryAttempt::from_outcome(
            self.ids.next_id(),
            message.id,
            destination,
            retry_count,
            &outcome,
            self.clock.now(),
        );
        self.attempts.append(&attempt).await?;
        Ok(success)
    }

    pub(crate) async fn schedule_retry(&self, job: &RetryJob) -> ReminderResult<()> {
        self.retry_queue.enqueue(job).await?;
        StructuredLogger::log_retry_enqueued(
            job.message_id,
            job.destination_id,
            job.retry_count,
            job.due_at,
        );
        self.metrics.record_retry_enqueued();
        Ok(())
    }
}
