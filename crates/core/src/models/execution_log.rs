use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{ReminderError, Result};

/// 单次触发的执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failed,
    Skipped,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failed => "failed",
            ExecutionOutcome::Skipped => "skipped",
        }
    }
}

impl FromStr for ExecutionOutcome {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(ExecutionOutcome::Success),
            "failed" => Ok(ExecutionOutcome::Failed),
            "skipped" => Ok(ExecutionOutcome::Skipped),
            other => Err(ReminderError::validation(format!("无效的执行结果: {other}"))),
        }
    }
}

crate::impl_sqlite_text_enum!(ExecutionOutcome);

/// 任务执行日志，只追加不修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// 存储分配的自增ID，写入前为0
    pub id: i64,
    pub task_id: i64,
    /// 计划触发时刻
    pub scheduled_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub message_id: Option<i64>,
    /// 失败原因或跳过原因
    pub error_message: Option<String>,
    pub node_id: String,
    /// 锁被拒绝时记录的持有者，用于区分重复触发和残留锁
    pub lock_holder: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn success(
        task_id: i64,
        scheduled_at: DateTime<Utc>,
        message_id: i64,
        duration_ms: i64,
        node_id: &str,
    ) -> Self {
        Self {
            id: 0,
            task_id,
            scheduled_at,
            outcome: ExecutionOutcome::Success,
            message_id: Some(message_id),
            error_message: None,
            node_id: node_id.to_string(),
            lock_holder: None,
            duration_ms,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        task_id: i64,
        scheduled_at: DateTime<Utc>,
        error: impl Into<String>,
        duration_ms: i64,
        node_id: &str,
    ) -> Self {
        Self {
            id: 0,
            task_id,
            scheduled_at,
            outcome: ExecutionOutcome::Failed,
            message_id: None,
            error_message: Some(error.into()),
            node_id: node_id.to_string(),
            lock_holder: None,
            duration_ms,
            created_at: Utc::now(),
        }
    }

    pub fn skipped(
        task_id: i64,
        scheduled_at: DateTime<Utc>,
        reason: impl Into<String>,
        node_id: &str,
    ) -> Self {
        Self {
            id: 0,
            task_id,
            scheduled_at,
            outcome: ExecutionOutcome::Skipped,
            message_id: None,
            error_message: Some(reason.into()),
            node_id: node_id.to_string(),
            lock_holder: None,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_lock_holder(mut self, holder: Option<String>) -> Self {
        self.lock_holder = holder;
        self
    }

    /// 成功记录附带的错误说明，例如消息已派发但执行次数没记上
    pub fn with_error_message(mut self, error: Option<String>) -> Self {
        if error.is_some() {
            self.error_message = error;
        }
        self
    }
}
