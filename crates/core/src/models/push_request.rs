use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{MessageLevel, MessageType};

/// 推送请求
///
/// 外部接口与定时任务共用同一结构。`user_key` 和 `owner_id` 至少有一个，
/// 前者来自推送URL，后者由任务执行器直接给出。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    #[serde(default)]
    pub user_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_message_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_level")]
    pub level: MessageLevel,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
    #[serde(default)]
    pub platforms: Vec<String>,
}

/// 外部级别词汇按推送应用的习惯映射，无法识别的值视为 `normal`
fn lenient_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MessageLevel, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(MessageLevel::parse_lenient(
        value.as_ref().and_then(|v| v.as_str()),
    ))
}

fn lenient_message_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<MessageType, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(MessageType::parse_lenient(
        value.as_ref().and_then(|v| v.as_str()),
    ))
}

impl PushRequest {
    pub fn has_title_or_content(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.title) || present(&self.content)
    }

    pub fn has_identity(&self) -> bool {
        self.owner_id.is_some()
            || self
                .user_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
    }
}

/// 受理回执
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    pub message_id: i64,
    /// Unix秒
    pub timestamp: i64,
}

impl PushReceipt {
    pub fn new(message_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            message_id,
            timestamp: at.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_presence_checks() {
        let mut req = PushRequest::default();
        assert!(!req.has_title_or_content());
        assert!(!req.has_identity());

        req.content = Some("  ".to_string());
        assert!(!req.has_title_or_content());
        req.title = Some("hi".to_string());
        assert!(req.has_title_or_content());

        req.user_key = Some("".to_string());
        assert!(!req.has_identity());
        req.owner_id = Some(1);
        assert!(req.has_identity());
    }

    #[test]
    fn test_request_json_defaults() {
        let req: PushRequest =
            serde_json::from_str(r#"{"userKey":"abc","content":"hello","level":"high"}"#).unwrap();
        assert_eq!(req.user_key.as_deref(), Some("abc"));
        assert_eq!(req.level, MessageLevel::High);
        assert_eq!(req.message_type, MessageType::Notification);
        assert!(req.tags.is_empty());
    }

    #[test]
    fn test_request_json_accepts_external_levels() {
        let req: PushRequest =
            serde_json::from_str(r#"{"userKey":"abc","level":"passive","messageType":"SYSTEM"}"#)
                .unwrap();
        assert_eq!(req.level, MessageLevel::Low);
        assert_eq!(req.message_type, MessageType::System);

        let req: PushRequest = serde_json::from_str(r#"{"userKey":"abc","level":"loud"}"#).unwrap();
        assert_eq!(req.level, MessageLevel::Normal);
    }
}
