use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{ReminderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failure,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failure => "failure",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "success" => Ok(DeliveryStatus::Success),
            "failure" => Ok(DeliveryStatus::Failure),
            other => Err(ReminderError::validation(format!("无效的投递状态: {other}"))),
        }
    }
}

crate::impl_sqlite_text_enum!(DeliveryStatus);

/// 发送器返回的结果，发送器边界之外不再抛出传输错误
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub status: DeliveryStatus,
    /// 诊断用，发送的请求摘要（敏感字段已打码）
    pub request_data: Option<String>,
    pub provider_response: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn success(request_data: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Success,
            request_data: Some(request_data.into()),
            provider_response: Some(response.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Failure,
            request_data: None,
            provider_response: None,
            error: Some(error.into()),
        }
    }

    pub fn with_request(mut self, request_data: impl Into<String>) -> Self {
        self.request_data = Some(request_data.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.provider_response = Some(response.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}

/// 单次投递尝试，只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub id: i64,
    pub message_id: i64,
    pub destination_id: i64,
    pub owner_id: i64,
    pub platform: String,
    pub config_name: String,
    pub status: DeliveryStatus,
    pub retry_count: i32,
    pub request_data: Option<String>,
    pub response_data: Option<String>,
    pub error_message: Option<String>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn from_outcome(
        id: i64,
        message_id: i64,
        destination: &super::Destination,
        retry_count: i32,
        outcome: &SendOutcome,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            message_id,
            destination_id: destination.id,
            owner_id: destination.owner_id,
            platform: destination.platform.clone(),
            config_name: destination.name.clone(),
            status: outcome.status,
            retry_count,
            request_data: outcome.request_data.clone(),
            response_data: outcome.provider_response.clone(),
            error_message: outcome.error.clone(),
            pushed_at: outcome.is_success().then_some(now),
            created_at: now,
        }
    }
}

/// 延迟重投任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryJob {
    pub message_id: i64,
    pub destination_id: i64,
    pub platform: String,
    /// 已经重试过的次数，首次失败入队时为0
    pub retry_count: i32,
    pub due_at: DateTime<Utc>,
}

impl RetryJob {
    pub fn new(
        message_id: i64,
        destination_id: i64,
        platform: impl Into<String>,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Self {
        Self {
            message_id,
            destination_id,
            platform: platform.into(),
            retry_count: 0,
            due_at: now + delay,
        }
    }

    /// 下一轮重试
    pub fn next(&self, now: DateTime<Utc>, delay: Duration) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            due_at: now + delay,
            ..self.clone()
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}
