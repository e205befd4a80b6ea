use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{ReminderError, Result};

/// 推送平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// 移动端推送Webhook
    Bark,
    Email,
    /// 主题推送服务
    WxPusher,
    PushMe,
    /// 通用Webhook
    Webhook,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 5] = [
        PlatformKind::Bark,
        PlatformKind::Email,
        PlatformKind::WxPusher,
        PlatformKind::PushMe,
        PlatformKind::Webhook,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            PlatformKind::Bark => "bark",
            PlatformKind::Email => "email",
            PlatformKind::WxPusher => "wxpusher",
            PlatformKind::PushMe => "pushme",
            PlatformKind::Webhook => "webhook",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.code()
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PlatformKind {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bark" => Ok(PlatformKind::Bark),
            "email" => Ok(PlatformKind::Email),
            "wxpusher" => Ok(PlatformKind::WxPusher),
            "pushme" => Ok(PlatformKind::PushMe),
            "webhook" => Ok(PlatformKind::Webhook),
            other => Err(ReminderError::validation(format!("不支持的推送平台: {other}"))),
        }
    }
}

crate::impl_sqlite_text_enum!(PlatformKind);

/// 用户配置的推送目标
///
/// `platform` 以原始文本保存，未知平台在投递时记为失败而不是在读取时报错。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: i64,
    pub owner_id: i64,
    pub platform: String,
    pub name: String,
    /// 平台相关参数
    pub config: serde_json::Value,
    pub enabled: bool,
    pub sort_order: i32,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Destination {
    pub fn new(
        id: i64,
        owner_id: i64,
        platform: impl Into<String>,
        name: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id,
            owner_id,
            platform: platform.into(),
            name: name.into(),
            config,
            enabled: true,
            sort_order: 0,
            remark: None,
            created_at: Utc::now(),
        }
    }

    pub fn platform_kind(&self) -> Result<PlatformKind> {
        self.platform.parse()
    }

    /// 读取字符串参数，空串视为缺失
    pub fn param(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        match self.config.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        match self.config.get(key)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// 标签路由规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRoute {
    pub id: i64,
    pub owner_id: i64,
    pub tag_name: String,
    pub destination_ids: Vec<i64>,
    pub enabled: bool,
    pub remark: Option<String>,
}

impl TagRoute {
    pub fn new(id: i64, owner_id: i64, tag_name: impl Into<String>, destination_ids: Vec<i64>) -> Self {
        Self {
            id,
            owner_id,
            tag_name: tag_name.into(),
            destination_ids,
            enabled: true,
            remark: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_codes() {
        for kind in PlatformKind::ALL {
            assert_eq!(kind.code().parse::<PlatformKind>().unwrap(), kind);
        }
        assert_eq!(" Bark ".parse::<PlatformKind>().unwrap(), PlatformKind::Bark);
        let err = "dingtalk".parse::<PlatformKind>().unwrap_err();
        assert!(err.to_string().contains("不支持的推送平台: dingtalk"));
    }

    #[test]
    fn test_param_access() {
        let dest = Destination::new(
            1,
            100,
            "wxpusher",
            "微信",
            json!({"appToken": " AT_x ", "uid": "", "contentType": "3", "verbose": true}),
        );
        assert_eq!(dest.param("appToken"), Some("AT_x"));
        assert_eq!(dest.param("uid"), None);
        assert_eq!(dest.param("missing"), None);
        assert_eq!(dest.param_i64("contentType"), Some(3));
        assert_eq!(dest.param_bool("verbose"), Some(true));
        assert_eq!(dest.platform_kind().unwrap(), PlatformKind::WxPusher);
    }
}
