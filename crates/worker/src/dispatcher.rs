use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use reminder_core::{
    models::{FanoutJob, MessageRecord, MessageStatus, PushReceipt, PushRequest, User},
    traits::{Clock, MessageIntake, MessageQueue, MessageRepository, UserRepository},
    IdGenerator, ReminderError, ReminderResult,
};
use reminder_infrastructure::{MetricsCollector, StructuredLogger};

use crate::intake::PushInput;

/// 消息受理：校验、落库、投递扇出任务
///
/// 调用方只等待落库和入队，不等待任何平台的发送结果。
pub struct MessageDispatcher {
    users: Arc<dyn UserRepository>,
    messages: Arc<dyn MessageRepository>,
    queue: Arc<dyn MessageQueue>,
    fanout_queue: String,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl MessageDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        messages: Arc<dyn MessageRepository>,
        queue: Arc<dyn MessageQueue>,
        fanout_queue: impl Into<String>,
        ids: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            users,
            messages,
            queue,
            fanout_queue: fanout_queue.into(),
            ids,
            clock,
            metrics,
        }
    }

    /// 解析外部调用并受理，返回回执
    pub async fn accept(&self, input: PushInput) -> ReminderResult<PushReceipt> {
        let request = input.into_request()?;
        let message_id = self.submit(request).await?;
        Ok(PushReceipt::new(message_id, self.clock.now()))
    }

    async fn resolve_owner(&self, request: &PushRequest) -> ReminderResult<User> {
        if let Some(owner_id) = request.owner_id {
            return self
                .users
                .get_by_id(owner_id)
                .await?
                .ok_or_else(|| ReminderError::UserNotFound(owner_id.to_string()));
        }

        let user_key = request.user_key.as_deref().unwrap_or_default().trim();
        self.users
            .find_by_user_key(user_key)
            .await?
            .ok_or_else(|| ReminderError::UserNotFound(user_key.to_string()))
    }

    fn build_record(&self, owner: &User, request: PushRequest) -> MessageRecord {
        MessageRecord {
            id: self.ids.next_id(),
            owner_id: owner.id,
            user_code: owner.username.clone(),
            message_type: request.message_type,
            title: request.title.unwrap_or_default(),
            subtitle: request.subtitle,
            content: request.content.unwrap_or_default(),
            group: request.group,
            url: request.url.unwrap_or_default(),
            source: request.source.unwrap_or_default(),
            level: request.level,
            tags: request.tags,
            extra_data: request
                .extra_data
                .unwrap_or_else(|| serde_json::json!({})),
            status: MessageStatus::Queued,
            requested_platforms: request.platforms,
            pushed_platforms: BTreeSet::new(),
            push_success_count: 0,
            push_fail_count: 0,
            created_at: self.clock.now(),
        }
    }
}

#[async_trait]
impl MessageIntake for MessageDispatcher {
    async fn submit(&self, request: PushRequest) -> ReminderResult<i64> {
        if !request.has_title_or_content() {
            return Err(ReminderError::validation("消息标题和内容不能同时为空"));
        }
        if !request.has_identity() {
            return Err(ReminderError::validation("用户标识不能为空"));
        }

        let owner = self.resolve_owner(&request).await?;
        let message = self.build_record(&owner, request);
        let message_id = message.id;

        self.messages.create(&message).await?;
        StructuredLogger::log_message_accepted(message_id, message.owner_id, &message.tags);
        self.metrics.record_message_accepted();

        match self
            .queue
            .publish(&self.fanout_queue, &FanoutJob::new(message))
            .await
        {
            Ok(queue_id) => {
                debug!("扇出任务已入队: message_id={}, queue_id={}", message_id, queue_id);
                Ok(message_id)
            }
            Err(e) => {
                error!(
                    "消息已保存但扇出任务入队失败，该消息不会被推送: message_id={}, error={}",
                    message_id, e
                );
                if let Err(status_err) = self
                    .messages
                    .update_status(message_id, MessageStatus::EnqueueFailed)
                    .await
                {
                    error!(
                        "更新消息状态失败: message_id={}, error={}",
                        message_id, status_err
                    );
                }
                Err(ReminderError::MessageQueue(format!(
                    "消息入队失败: message_id={message_id}, {e}"
                )))
            }
        }
    }
}
