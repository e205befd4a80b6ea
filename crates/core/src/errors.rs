use thiserror::Error;

/// 提醒系统错误类型定义
#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的时区: {0}")]
    InvalidTimezone(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("消息未找到: {id}")]
    MessageNotFound { id: i64 },

    #[error("推送配置未找到: {id}")]
    DestinationNotFound { id: i64 },

    #[error("用户不存在: {0}")]
    UserNotFound(String),

    #[error("无权操作: {0}")]
    PermissionDenied(String),

    #[error("分布式锁错误: {0}")]
    Lock(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ReminderError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// 调用方输入错误，同步返回且无副作用
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidCron { .. } | Self::InvalidTimezone(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound { .. }
                | Self::MessageNotFound { .. }
                | Self::DestinationNotFound { .. }
                | Self::UserNotFound(_)
        )
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, ReminderError>;
