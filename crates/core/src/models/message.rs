use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::errors::{ReminderError, Result};

/// 消息类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Notification,
    Alert,
    System,
    Custom,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Notification => "notification",
            MessageType::Alert => "alert",
            MessageType::System => "system",
            MessageType::Custom => "custom",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageType::Notification => "通知",
            MessageType::Alert => "告警",
            MessageType::System => "系统",
            MessageType::Custom => "自定义",
        }
    }

    /// 宽松解析，未知类型回落到通知
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for MessageType {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "notification" => Ok(MessageType::Notification),
            "alert" => Ok(MessageType::Alert),
            "system" => Ok(MessageType::System),
            "custom" => Ok(MessageType::Custom),
            other => Err(ReminderError::validation(format!("无效的消息类型: {other}"))),
        }
    }
}

/// 消息级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLevel::Low => "low",
            MessageLevel::Normal => "normal",
            MessageLevel::High => "high",
            MessageLevel::Critical => "critical",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageLevel::Low => "低",
            MessageLevel::Normal => "普通",
            MessageLevel::High => "高",
            MessageLevel::Critical => "紧急",
        }
    }

    /// 兼容移动推送应用的四值级别词汇
    ///
    /// `passive`→低, `active`→普通, `timeSensitive`→高, `critical`→紧急，
    /// 其余（包括本系统自身的级别名以外的任何值）回落到普通。
    pub fn from_external(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "passive" => MessageLevel::Low,
            "active" => MessageLevel::Normal,
            "timesensitive" => MessageLevel::High,
            "critical" => MessageLevel::Critical,
            _ => MessageLevel::Normal,
        }
    }

    /// 先按本系统级别名解析，失败再按外部词汇映射
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value {
            Some(v) => v
                .trim()
                .parse()
                .unwrap_or_else(|_| MessageLevel::from_external(v)),
            None => MessageLevel::Normal,
        }
    }
}

impl FromStr for MessageLevel {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(MessageLevel::Low),
            "normal" => Ok(MessageLevel::Normal),
            "high" => Ok(MessageLevel::High),
            "critical" => Ok(MessageLevel::Critical),
            other => Err(ReminderError::validation(format!("无效的消息级别: {other}"))),
        }
    }
}

/// 消息入队状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Queued,
    EnqueueFailed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::EnqueueFailed => "enqueue_failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(MessageStatus::Queued),
            "enqueue_failed" => Ok(MessageStatus::EnqueueFailed),
            other => Err(ReminderError::validation(format!("无效的消息状态: {other}"))),
        }
    }
}

crate::impl_sqlite_text_enum!(MessageType);
crate::impl_sqlite_text_enum!(MessageLevel);
crate::impl_sqlite_text_enum!(MessageStatus);

/// 一条逻辑通知
///
/// 受理后除两个聚合计数和已推送平台集合外不再修改。计数由存储层原子递增，
/// 内存中的 `push_success_count` / `push_fail_count` 只是读取时的快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: i64,
    pub owner_id: i64,
    pub user_code: String,
    pub message_type: MessageType,
    pub title: String,
    pub subtitle: Option<String>,
    pub content: String,
    pub group: Option<String>,
    pub url: String,
    pub source: String,
    pub level: MessageLevel,
    pub tags: Vec<String>,
    pub extra_data: serde_json::Value,
    pub status: MessageStatus,
    /// 请求显式指定的平台子集，为空表示不限
    pub requested_platforms: Vec<String>,
    /// 已成功推送过的平台
    pub pushed_platforms: BTreeSet<String>,
    pub push_success_count: i32,
    pub push_fail_count: i32,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn type_label(&self) -> &'static str {
        self.message_type.label()
    }

    pub fn level_label(&self) -> &'static str {
        self.level.label()
    }

    /// 标题为空时以内容代替，供只有单行摘要的通道使用
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.content
        } else {
            &self.title
        }
    }

    pub fn has_source(&self) -> bool {
        !self.source.trim().is_empty()
    }

    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// 扇出任务，携带完整消息以免消费者回查
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutJob {
    pub message: MessageRecord,
}

impl FanoutJob {
    pub fn new(message: MessageRecord) -> Self {
        Self { message }
    }

    pub fn message_id(&self) -> i64 {
        self.message.id
    }
}
