//! 测试数据构建工具，供各crate的测试复用

use chrono::Utc;
use reminder_core::models::{
    Destination, MessageLevel, MessageRecord, MessageStatus, MessageType,
};
use std::collections::BTreeSet;

pub fn sample_message(id: i64, owner_id: i64) -> MessageRecord {
    MessageRecord {
        id,
        owner_id,
        user_code: format!("user-{owner_id}"),
        message_type: MessageType::Notification,
        title: "测试标题".to_string(),
        subtitle: None,
        content: "测试内容".to_string(),
        group: None,
        url: String::new(),
        source: String::new(),
        level: MessageLevel::Normal,
        tags: Vec::new(),
        extra_data: serde_json::json!({}),
        status: MessageStatus::Queued,
        requested_platforms: Vec::new(),
        pushed_platforms: BTreeSet::new(),
        push_success_count: 0,
        push_fail_count: 0,
        created_at: Utc::now(),
    }
}

pub fn sample_destination(id: i64, owner_id: i64, platform: &str) -> Destination {
    Destination::new(
        id,
        owner_id,
        platform,
        format!("{platform}-{id}"),
        serde_json::json!({}),
    )
}
