use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{ReminderError, Result};

/// 任务默认时区
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

/// 定时提醒任务
///
/// 一条任务描述"在什么时间、以什么内容、给谁"发送提醒。调度时间由
/// 6/7 字段的 cron 表达式在 `timezone` 时区下求值。
///
/// # 字段说明
///
/// - `owner_id`: 任务所属用户
/// - `schedule_type`: 调度类型，仅用于展示和一次性任务判定
/// - `start_date` / `end_date`: 有效期，两端均可为空（开区间）
/// - `max_executions`: 最大执行次数，负数表示不限
/// - `executed_count`: 已成功执行次数，只有执行器在推送成功后才会递增
/// - `deleted_at`: 软删除时间，删除后行保留、状态置为 `deleted`
///
/// # 使用示例
///
/// ```rust
/// use reminder_core::models::{ScheduledTask, TaskStatus};
///
/// let task = ScheduledTask::builder(1, 100, "喝水提醒", "0 0 9 * * *")
///     .message("该喝水了", "起来活动一下")
///     .max_executions(3)
///     .build();
/// assert_eq!(task.status, TaskStatus::Enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub message_title: String,
    pub message_content: String,
    pub message_url: Option<String>,
    pub tags: Vec<String>,
    pub schedule_type: ScheduleType,
    pub cron_expression: String,
    pub timezone: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub max_executions: i32,
    pub executed_count: i32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn builder(
        id: i64,
        owner_id: i64,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> ScheduledTaskBuilder {
        ScheduledTaskBuilder::new(id, owner_id, name.into(), cron_expression.into())
    }

    /// 解析任务时区，空值回落到默认时区
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    /// 任务时区下的"今天"
    pub fn local_date(&self, now: DateTime<Utc>) -> Result<NaiveDate> {
        Ok(now.with_timezone(&self.tz()?).date_naive())
    }

    /// 给定日期任务是否可以执行
    pub fn can_execute_on(&self, today: NaiveDate) -> bool {
        if self.status != TaskStatus::Enabled || self.deleted_at.is_some() {
            return false;
        }
        if self.start_date.is_some_and(|start| today < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| today > end) {
            return false;
        }
        !self.executions_exhausted()
    }

    /// 按任务时区判定当前是否可以执行，时区非法时视为不可执行
    pub fn can_execute(&self, now: DateTime<Utc>) -> bool {
        self.local_date(now)
            .map(|today| self.can_execute_on(today))
            .unwrap_or(false)
    }

    pub fn is_once(&self) -> bool {
        self.schedule_type == ScheduleType::Once
    }

    fn executions_exhausted(&self) -> bool {
        self.max_executions >= 0 && self.executed_count >= self.max_executions
    }

    /// 任务是否已经走到终态
    ///
    /// 一次性任务执行过一次、达到最大执行次数、或已过结束日期。
    pub fn is_completed_on(&self, today: NaiveDate) -> bool {
        if self.is_once() && self.executed_count > 0 {
            return true;
        }
        if self.max_executions > 0 && self.executed_count >= self.max_executions {
            return true;
        }
        self.end_date.is_some_and(|end| today > end)
    }
}

/// 解析IANA时区名称
pub fn parse_timezone(name: &str) -> Result<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return Tz::from_str(DEFAULT_TIMEZONE)
            .map_err(|_| ReminderError::InvalidTimezone(DEFAULT_TIMEZONE.to_string()));
    }
    Tz::from_str(name).map_err(|_| ReminderError::InvalidTimezone(name.to_string()))
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enabled,
    Disabled,
    Completed,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Enabled => "enabled",
            TaskStatus::Disabled => "disabled",
            TaskStatus::Completed => "completed",
            TaskStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enabled" => Ok(TaskStatus::Enabled),
            "disabled" => Ok(TaskStatus::Disabled),
            "completed" => Ok(TaskStatus::Completed),
            "deleted" => Ok(TaskStatus::Deleted),
            other => Err(ReminderError::validation(format!("无效的任务状态: {other}"))),
        }
    }
}

/// 调度类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Once,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Once => "once",
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Monthly => "monthly",
            ScheduleType::Custom => "custom",
        }
    }
}

impl FromStr for ScheduleType {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "once" => Ok(ScheduleType::Once),
            "daily" => Ok(ScheduleType::Daily),
            "weekly" => Ok(ScheduleType::Weekly),
            "monthly" => Ok(ScheduleType::Monthly),
            "custom" => Ok(ScheduleType::Custom),
            other => Err(ReminderError::validation(format!("不支持的调度类型: {other}"))),
        }
    }
}

crate::impl_sqlite_text_enum!(TaskStatus);
crate::impl_sqlite_text_enum!(ScheduleType);

/// 创建或更新任务的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub message_title: String,
    pub message_content: String,
    #[serde(default)]
    pub message_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub schedule_type: ScheduleType,
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_max_executions")]
    pub max_executions: i32,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_max_executions() -> i32 {
    -1
}

impl TaskSpec {
    /// 校验与cron无关的字段
    pub fn validate_fields(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ReminderError::validation("任务名称不能为空"));
        }
        if self.message_title.trim().is_empty() {
            return Err(ReminderError::validation("通知标题不能为空"));
        }
        if self.message_content.trim().is_empty() {
            return Err(ReminderError::validation("通知内容不能为空"));
        }
        if self.cron_expression.trim().is_empty() {
            return Err(ReminderError::validation("Cron表达式不能为空"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ReminderError::validation("开始日期不能晚于结束日期"));
            }
        }
        parse_timezone(&self.timezone)?;
        Ok(())
    }

    /// 把输入字段写入任务，保留id、归属、执行次数和创建时间
    pub fn apply_to(&self, task: &mut ScheduledTask, now: DateTime<Utc>) {
        task.name = self.name.clone();
        task.description = self.description.clone();
        task.message_title = self.message_title.clone();
        task.message_content = self.message_content.clone();
        task.message_url = self.message_url.clone();
        task.tags = self.tags.clone();
        task.schedule_type = self.schedule_type;
        task.cron_expression = self.cron_expression.trim().to_string();
        task.timezone = self.timezone.clone();
        task.start_date = self.start_date;
        task.end_date = self.end_date;
        task.max_executions = self.max_executions;
        task.updated_at = now;
    }

    pub fn into_task(self, id: i64, owner_id: i64, now: DateTime<Utc>) -> ScheduledTask {
        let mut task = ScheduledTask::builder(id, owner_id, self.name.clone(), "")
            .created_at(now)
            .build();
        self.apply_to(&mut task, now);
        task
    }
}

/// 任务列表过滤条件
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub schedule_type: Option<ScheduleType>,
    pub keyword: Option<String>,
    pub include_deleted: bool,
    pub offset: i64,
    pub limit: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            schedule_type: None,
            keyword: None,
            include_deleted: false,
            offset: 0,
            limit: 20,
        }
    }
}

impl TaskFilter {
    /// 内存过滤，与SQL实现保持同一语义
    pub fn matches(&self, task: &ScheduledTask) -> bool {
        if !self.include_deleted && task.deleted_at.is_some() {
            return false;
        }
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if self.schedule_type.is_some_and(|t| t != task.schedule_type) {
            return false;
        }
        match self.keyword.as_deref().map(str::trim) {
            Some(keyword) if !keyword.is_empty() => {
                task.name.contains(keyword)
                    || task
                        .description
                        .as_deref()
                        .is_some_and(|d| d.contains(keyword))
            }
            _ => true,
        }
    }
}

/// 任务构建器，测试和服务层共用
#[derive(Debug, Clone)]
pub struct ScheduledTaskBuilder {
    task: ScheduledTask,
}

impl ScheduledTaskBuilder {
    fn new(id: i64, owner_id: i64, name: String, cron_expression: String) -> Self {
        let now = Utc::now();
        Self {
            task: ScheduledTask {
                id,
                owner_id,
                name,
                description: None,
                message_title: String::new(),
                message_content: String::new(),
                message_url: None,
                tags: Vec::new(),
                schedule_type: ScheduleType::Custom,
                cron_expression,
                timezone: DEFAULT_TIMEZONE.to_string(),
                start_date: None,
                end_date: None,
                max_executions: -1,
                executed_count: 0,
                status: TaskStatus::Enabled,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        }
    }

    pub fn message(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.task.message_title = title.into();
        self.task.message_content = content.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.task.message_url = Some(url.into());
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.task.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn schedule_type(mut self, schedule_type: ScheduleType) -> Self {
        self.task.schedule_type = schedule_type;
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.task.timezone = timezone.into();
        self
    }

    pub fn window(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.task.start_date = start;
        self.task.end_date = end;
        self
    }

    pub fn max_executions(mut self, max: i32) -> Self {
        self.task.max_executions = max;
        self
    }

    pub fn executed_count(mut self, count: i32) -> Self {
        self.task.executed_count = count;
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.created_at = at;
        self.task.updated_at = at;
        self
    }

    pub fn build(self) -> ScheduledTask {
        self.task
    }
}
