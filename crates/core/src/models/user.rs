use serde::{Deserialize, Serialize};

/// 消息归属用户，只读使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    /// 推送URL中携带的用户标识
    pub user_key: String,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, user_key: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            user_key: user_key.into(),
        }
    }
}
