//! 分布式锁接口
//!
//! 任何支持"带过期时间的原子比较并设置"的存储都可以实现 [`DistributedLock`]。
//! 获取锁是非阻塞的：在很短的等待上限内拿不到就返回 [`LockAttempt::Denied`]，
//! 这在集群中是正常结果（另一个节点正在执行同一次触发），不是错误。
//!
//! 租约到期自动释放，持有者崩溃后不会阻塞后续触发。

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ReminderResult;

/// 锁的持有者信息，序列化后作为锁的值保存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolder {
    pub node_id: String,
    /// 每次获取唯一，释放时用于比较
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
        }
    }

    /// 用于执行日志的简短描述
    pub fn describe(&self) -> String {
        format!("{}@{}", self.node_id, self.acquired_at.to_rfc3339())
    }
}

/// 已获得的租约
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub holder: LockHolder,
    pub lease: Duration,
}

impl LockLease {
    pub fn token(&self) -> &str {
        &self.holder.token
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Granted(LockLease),
    /// 锁被占用，能读到时附带当前持有者
    Denied { holder: Option<LockHolder> },
}

impl LockAttempt {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockAttempt::Granted(_))
    }
}

/// 分布式锁服务
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试获取锁，最多等待 `wait`
    async fn try_acquire(
        &self,
        key: &str,
        node_id: &str,
        lease: Duration,
        wait: Duration,
    ) -> ReminderResult<LockAttempt>;

    /// 释放锁，仅当令牌匹配时删除
    ///
    /// 调用方不是持有者（租约已过期或已被他人获取）时不做任何事并返回 `false`，
    /// 因此可以无条件调用。
    async fn release(&self, lease: &LockLease) -> ReminderResult<bool>;

    async fn is_held(&self, key: &str) -> ReminderResult<bool>;

    /// 剩余租约，未被持有时返回 `None`
    async fn remaining_lease(&self, key: &str) -> ReminderResult<Option<Duration>>;

    async fn holder(&self, key: &str) -> ReminderResult<Option<LockHolder>>;
}

/// 单次触发的锁键：`{prefix}{taskId}:{yyyyMMddHHmm}`
///
/// 时间取任务本地时区并截断到分钟，同一分钟内各节点算出的键一致。
pub fn occurrence_lock_key<Tz: TimeZone>(prefix: &str, task_id: i64, occurrence: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}:{}", prefix, task_id, occurrence.format("%Y%m%d%H%M"))
}
