//! 数据仓储层接口定义
//!
//! 核心逻辑只依赖这里的抽象，具体实现位于基础设施层：
//! - SQLite 实现
//! - 内存实现（`memory://` 部署和测试用）
//!
//! ## 并发约定
//!
//! 消息的推送计数由多个扇出任务并发更新，实现必须在存储内原子递增
//! （`UPDATE ... SET x = x + 1` 或等价操作），不能读出再写回。
//! 任务的 `executed_count` 同理。
//!
//! 执行日志和投递记录只追加，不提供修改接口。

use async_trait::async_trait;

use crate::{
    models::{
        DeliveryAttempt, Destination, ExecutionLogEntry, MessageRecord, MessageStatus,
        ScheduledTask, TagRoute, TaskFilter, TaskStatus, User,
    },
    ReminderResult,
};
use chrono::{DateTime, Utc};

/// 定时任务仓储接口
///
/// # 线程安全
///
/// 此trait要求实现 `Send + Sync`，确保可以在多线程环境中安全使用。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 保存新任务，ID由调用方的ID生成器分配
    async fn create(&self, task: &ScheduledTask) -> ReminderResult<()>;

    /// 根据ID获取任务，软删除的任务同样返回
    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<ScheduledTask>>;

    /// 整行覆盖更新
    ///
    /// 不会修改 `executed_count`，该字段只能通过
    /// [`increment_executed_count`](Self::increment_executed_count) 变更。
    async fn update(&self, task: &ScheduledTask) -> ReminderResult<()>;

    /// 分页查询某个用户的任务
    async fn list_by_owner(
        &self,
        owner_id: i64,
        filter: &TaskFilter,
    ) -> ReminderResult<Vec<ScheduledTask>>;

    /// 按过滤条件计数，忽略分页参数
    async fn count_by_owner(&self, owner_id: i64, filter: &TaskFilter) -> ReminderResult<i64>;

    /// 所有启用且未删除的任务
    ///
    /// 日期窗口和执行次数由调用方按任务时区再判定，这里只做粗筛。
    async fn list_enabled(&self) -> ReminderResult<Vec<ScheduledTask>>;

    /// 原子递增已执行次数，返回递增后的值
    async fn increment_executed_count(&self, id: i64) -> ReminderResult<i32>;

    async fn update_status(&self, id: i64, status: TaskStatus) -> ReminderResult<()>;

    /// 软删除：写入删除时间并把状态置为 `deleted`，行保留
    async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> ReminderResult<()>;
}

/// 任务执行日志仓储
#[async_trait]
pub trait ExecutionLogRepository: Send + Sync {
    /// 追加一条日志，返回存储分配的ID
    async fn append(&self, entry: &ExecutionLogEntry) -> ReminderResult<i64>;

    /// 按时间倒序分页
    async fn list_by_task(
        &self,
        task_id: i64,
        offset: i64,
        limit: i64,
    ) -> ReminderResult<Vec<ExecutionLogEntry>>;

    async fn count_by_task(&self, task_id: i64) -> ReminderResult<i64>;
}

/// 消息仓储
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &MessageRecord) -> ReminderResult<()>;

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<MessageRecord>>;

    async fn update_status(&self, id: i64, status: MessageStatus) -> ReminderResult<()>;

    /// 记录一次投递结果
    ///
    /// 成功时原子递增成功计数，并把平台加入已推送集合（已存在则忽略）；
    /// 失败时原子递增失败计数。
    async fn record_delivery(
        &self,
        id: i64,
        platform: &str,
        success: bool,
    ) -> ReminderResult<()>;
}

/// 投递记录仓储
#[async_trait]
pub trait DeliveryAttemptRepository: Send + Sync {
    async fn append(&self, attempt: &DeliveryAttempt) -> ReminderResult<()>;

    /// 该消息对该目标是否已有成功记录，用于重复投递的扇出任务去重
    async fn has_success(&self, message_id: i64, destination_id: i64) -> ReminderResult<bool>;

    /// 是否已有首次投递记录（`retry_count == 0`），无论成败
    async fn has_first_attempt(&self, message_id: i64, destination_id: i64) -> ReminderResult<bool>;

    async fn list_by_message(&self, message_id: i64) -> ReminderResult<Vec<DeliveryAttempt>>;
}

/// 推送配置仓储，核心逻辑只读
#[async_trait]
pub trait DestinationRepository: Send + Sync {
    /// 用户所有启用的推送配置，按 `sort_order` 升序
    async fn list_enabled_by_owner(&self, owner_id: i64) -> ReminderResult<Vec<Destination>>;

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<Destination>>;

    /// 新增或覆盖，供外部配置管理和测试使用
    async fn save(&self, destination: &Destination) -> ReminderResult<()>;
}

/// 标签路由仓储
#[async_trait]
pub trait TagRouteRepository: Send + Sync {
    async fn list_enabled_by_owner(&self, owner_id: i64) -> ReminderResult<Vec<TagRoute>>;

    async fn save(&self, route: &TagRoute) -> ReminderResult<()>;
}

/// 用户仓储
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_user_key(&self, user_key: &str) -> ReminderResult<Option<User>>;

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<User>>;

    async fn save(&self, user: &User) -> ReminderResult<()>;
}
