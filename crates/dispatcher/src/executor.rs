//! 单次触发的执行器
//!
//! ```text
//! Scheduled → LockAttempt → LockDenied ⇒ Skipped
//!                         → LockGranted → EligibilityRecheck → Ineligible ⇒ Skipped
//!                                                            → Eligible → Dispatch ⇒ Success | Failed
//! ```
//!
//! 拿到锁之后无论走到哪个终态都会释放锁，每个终态恰好写一条执行日志。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

use reminder_core::{
    config::LockConfig,
    models::{ExecutionLogEntry, ExecutionOutcome, MessageType, PushRequest, ScheduledTask, TaskStatus},
    traits::{
        occurrence_lock_key, Clock, DistributedLock, ExecutionLogRepository, LockAttempt,
        LockLease, MessageIntake, TaskRepository,
    },
    ReminderResult,
};
use reminder_infrastructure::{MetricsCollector, StructuredLogger};

use crate::scheduler::{ExecutionReport, OccurrenceHandler};

/// 定时任务生成消息时的来源标识
pub const SCHEDULED_TASK_SOURCE: &str = "scheduled_task";

pub const LOCK_DENIED_REASON: &str = "获取分布式锁失败，任务已被其他节点执行";

/// 执行器的节点与锁参数
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub node_id: String,
    pub lock_key_prefix: String,
    pub lock_lease: Duration,
    pub lock_wait: Duration,
}

impl ExecutorConfig {
    pub fn from_lock_config(config: &LockConfig, node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            lock_key_prefix: config.key_prefix.clone(),
            lock_lease: Duration::from_secs(config.lease_seconds),
            lock_wait: Duration::from_millis(config.wait_millis),
        }
    }
}

/// 持锁期间的结果
enum LockedOutcome {
    /// 消息已派发；`bookkeeping_error` 是之后更新执行次数或状态时的错误
    Dispatched {
        message_id: i64,
        completed: bool,
        bookkeeping_error: Option<String>,
    },
    Ineligible { reason: String },
}

pub struct TaskExecutor {
    tasks: Arc<dyn TaskRepository>,
    execution_logs: Arc<dyn ExecutionLogRepository>,
    lock: Arc<dyn DistributedLock>,
    intake: Arc<dyn MessageIntake>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        execution_logs: Arc<dyn ExecutionLogRepository>,
        lock: Arc<dyn DistributedLock>,
        intake: Arc<dyn MessageIntake>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            tasks,
            execution_logs,
            lock,
            intake,
            clock,
            metrics,
            config,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// 执行一次触发
    #[instrument(skip(self, task), fields(task_id = task.id, occurrence = %occurrence))]
    pub async fn execute(&self, task: &ScheduledTask, occurrence: DateTime<Tz>) -> ExecutionReport {
        let started = Instant::now();
        let scheduled_at = occurrence.with_timezone(&Utc);
        let lock_key = occurrence_lock_key(&self.config.lock_key_prefix, task.id, &occurrence);

        let attempt = self
            .lock
            .try_acquire(
                &lock_key,
                &self.config.node_id,
                self.config.lock_lease,
                self.config.lock_wait,
            )
            .await;

        let lease = match attempt {
            Ok(LockAttempt::Granted(lease)) => lease,
            Ok(LockAttempt::Denied { holder }) => {
                let holder = holder.map(|h| h.describe());
                StructuredLogger::log_lock_denied(
                    task.id,
                    &lock_key,
                    &self.config.node_id,
                    holder.as_deref(),
                );
                let entry = ExecutionLogEntry::skipped(
                    task.id,
                    scheduled_at,
                    LOCK_DENIED_REASON,
                    &self.config.node_id,
                )
                .with_lock_holder(holder);
                return self.finish(entry, started, false).await;
            }
            Err(e) => {
                error!("获取分布式锁异常: task_id={}, key={}, error={}", task.id, lock_key, e);
                let entry = ExecutionLogEntry::failed(
                    task.id,
                    scheduled_at,
                    format!("获取分布式锁异常: {e}"),
                    elapsed_ms(started),
                    &self.config.node_id,
                );
                return self.finish(entry, started, false).await;
            }
        };

        debug!("获取分布式锁成功: {}", lock_key);
        let result = AssertUnwindSafe(self.run_locked(task.id))
            .catch_unwind()
            .await;
        self.release(&lease).await;

        let (entry, completed) = match result {
            Ok(Ok(LockedOutcome::Dispatched {
                message_id,
                completed,
                bookkeeping_error,
            })) => (
                ExecutionLogEntry::success(
                    task.id,
                    scheduled_at,
                    message_id,
                    elapsed_ms(started),
                    &self.config.node_id,
                )
                .with_error_message(bookkeeping_error),
                completed,
            ),
            Ok(Ok(LockedOutcome::Ineligible { reason })) => (
                ExecutionLogEntry::skipped(task.id, scheduled_at, reason, &self.config.node_id),
                false,
            ),
            Ok(Err(e)) => (
                ExecutionLogEntry::failed(
                    task.id,
                    scheduled_at,
                    e.to_string(),
                    elapsed_ms(started),
                    &self.config.node_id,
                ),
                false,
            ),
            Err(panic) => (
                ExecutionLogEntry::failed(
                    task.id,
                    scheduled_at,
                    format!("任务执行异常: {}", panic_message(panic.as_ref())),
                    elapsed_ms(started),
                    &self.config.node_id,
                ),
                false,
            ),
        };

        self.finish(entry, started, completed).await
    }

    /// 以当前时间作为触发时间立即执行，锁和日志与定时触发相同
    pub async fn execute_now(&self, task: &ScheduledTask) -> ReminderResult<ExecutionReport> {
        let tz = task.tz()?;
        let occurrence = self.clock.now().with_timezone(&tz);
        Ok(self.execute(task, occurrence).await)
    }

    /// 持锁后的步骤：重新加载并校验任务，提交消息，更新执行次数
    async fn run_locked(&self, task_id: i64) -> ReminderResult<LockedOutcome> {
        let Some(mut task) = self.tasks.get_by_id(task_id).await? else {
            return Ok(LockedOutcome::Ineligible {
                reason: "任务不存在".to_string(),
            });
        };

        let today = task.local_date(self.clock.now())?;
        if !task.can_execute_on(today) {
            let reason = if task.status != TaskStatus::Enabled || task.deleted_at.is_some() {
                format!("任务状态不允许执行: status={}", task.status.as_str())
            } else {
                format!(
                    "任务不在可执行范围内: date={}, executed={}/{}",
                    today, task.executed_count, task.max_executions
                )
            };
            return Ok(LockedOutcome::Ineligible { reason });
        }

        let message_id = self.intake.submit(Self::build_request(&task)).await?;

        // 消息已经派发，之后的记账失败不能把这次触发算作失败
        let (completed, bookkeeping_error) = match self.record_execution(&mut task, today).await {
            Ok(completed) => (completed, None),
            Err(e) => {
                error!(
                    "消息已派发但更新执行记录失败: task_id={}, message_id={}, error={}",
                    task.id, message_id, e
                );
                (false, Some(format!("更新执行记录失败: {e}")))
            }
        };

        Ok(LockedOutcome::Dispatched {
            message_id,
            completed,
            bookkeeping_error,
        })
    }

    /// 递增执行次数，达到完成条件时标记完成
    async fn record_execution(&self, task: &mut ScheduledTask, today: NaiveDate) -> ReminderResult<bool> {
        task.executed_count = self.tasks.increment_executed_count(task.id).await?;
        let completed = task.is_completed_on(today);
        if completed {
            self.tasks.update_status(task.id, TaskStatus::Completed).await?;
            debug!(
                "任务已完成: task_id={}, executed_count={}",
                task.id, task.executed_count
            );
        }
        Ok(completed)
    }

    fn build_request(task: &ScheduledTask) -> PushRequest {
        PushRequest {
            owner_id: Some(task.owner_id),
            message_type: MessageType::Notification,
            title: Some(task.message_title.clone()),
            content: Some(task.message_content.clone()),
            url: task.message_url.clone(),
            source: Some(SCHEDULED_TASK_SOURCE.to_string()),
            tags: task.tags.clone(),
            ..Default::default()
        }
    }

    async fn release(&self, lease: &LockLease) {
        match self.lock.release(lease).await {
            Ok(true) => debug!("释放分布式锁: {}", lease.key),
            Ok(false) => warn!("锁已不由本节点持有，可能租约已过期: {}", lease.key),
            Err(e) => error!("释放分布式锁失败: key={}, error={}", lease.key, e),
        }
    }

    /// 写入执行日志并生成报告
    async fn finish(
        &self,
        entry: ExecutionLogEntry,
        started: Instant,
        completed: bool,
    ) -> ExecutionReport {
        StructuredLogger::log_occurrence_finished(
            entry.task_id,
            entry.outcome.as_str(),
            entry.duration_ms,
            entry.message_id,
            entry.error_message.as_deref(),
        );
        self.metrics
            .record_occurrence(entry.outcome.as_str(), started.elapsed().as_secs_f64());

        if let Err(e) = self.execution_logs.append(&entry).await {
            error!("写入执行日志失败: task_id={}, error={}", entry.task_id, e);
        }

        ExecutionReport {
            task_id: entry.task_id,
            outcome: entry.outcome,
            message_id: entry.message_id,
            task_completed: completed && entry.outcome == ExecutionOutcome::Success,
        }
    }
}

#[async_trait]
impl OccurrenceHandler for TaskExecutor {
    async fn handle(&self, task: ScheduledTask, occurrence: DateTime<Tz>) -> ExecutionReport {
        self.execute(&task, occurrence).await
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Shanghai;
    use reminder_core::traits::ManualClock;
    use reminder_core::ReminderError;
    use reminder_infrastructure::{InMemoryLock, Repositories};
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::Mutex;

    #[derive(Clone, Copy)]
    enum IntakeMode {
        Ok,
        Fail,
        Panic,
    }

    struct FakeIntake {
        mode: IntakeMode,
        delay: Duration,
        next_id: AtomicI64,
        received: Mutex<Vec<PushRequest>>,
    }

    impl FakeIntake {
        fn new(mode: IntakeMode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                delay: Duration::ZERO,
                next_id: AtomicI64::new(1000),
                received: Mutex::new(Vec::new()),
            })
        }

        fn slow() -> Arc<Self> {
            Arc::new(Self {
                mode: IntakeMode::Ok,
                delay: Duration::from_millis(200),
                next_id: AtomicI64::new(1000),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageIntake for FakeIntake {
        async fn submit(&self, request: PushRequest) -> ReminderResult<i64> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.mode {
                IntakeMode::Ok => {
                    self.received.lock().await.push(request);
                    Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
                }
                IntakeMode::Fail => Err(ReminderError::Internal("数据库不可用".to_string())),
                IntakeMode::Panic => panic!("intake exploded"),
            }
        }
    }

    struct Fixture {
        repos: Repositories,
        lock: Arc<InMemoryLock>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                repos: Repositories::in_memory(),
                lock: Arc::new(InMemoryLock::new()),
                // 上海 2024-01-01 09:00
                clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap())),
            }
        }

        fn executor(&self, node: &str, intake: Arc<FakeIntake>) -> TaskExecutor {
            TaskExecutor::new(
                self.repos.tasks.clone(),
                self.repos.execution_logs.clone(),
                self.lock.clone(),
                intake,
                self.clock.clone(),
                Arc::new(MetricsCollector::new()),
                ExecutorConfig {
                    lock_wait: Duration::from_millis(50),
                    ..ExecutorConfig::from_lock_config(&LockConfig::default(), node)
                },
            )
        }

        async fn insert(&self, task: &ScheduledTask) {
            self.repos.tasks.create(task).await.unwrap();
        }
    }

    fn occurrence(day: u32) -> DateTime<Tz> {
        Shanghai.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap()
    }

    fn daily_task(id: i64) -> ScheduledTask {
        ScheduledTask::builder(id, 100, "喝水", "0 0 9 * * *")
            .message("该喝水了", "起来活动一下")
            .tags(&["health"])
            .build()
    }

    #[tokio::test]
    async fn test_success_dispatches_and_increments() {
        let fx = Fixture::new();
        fx.insert(&daily_task(1)).await;
        let intake = FakeIntake::new(IntakeMode::Ok);
        let executor = fx.executor("node-a", intake.clone());

        let report = executor.execute(&daily_task(1), occurrence(1)).await;
        assert_eq!(report.outcome, ExecutionOutcome::Success);
        assert_eq!(report.message_id, Some(1000));
        assert!(!report.task_completed);

        let request = intake.received.lock().await[0].clone();
        assert_eq!(request.owner_id, Some(100));
        assert_eq!(request.title.as_deref(), Some("该喝水了"));
        assert_eq!(request.source.as_deref(), Some(SCHEDULED_TASK_SOURCE));
        assert_eq!(request.tags, vec!["health".to_string()]);

        let task = fx.repos.tasks.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(task.executed_count, 1);
        let logs = fx.repos.execution_logs.list_by_task(1, 0, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].node_id, "node-a");
        assert!(!fx.lock.is_held("task_lock:1:202401010900").await.unwrap());
    }

    #[tokio::test]
    async fn test_completes_after_max_executions() {
        let fx = Fixture::new();
        let mut task = daily_task(1);
        task.max_executions = 3;
        fx.insert(&task).await;
        let executor = fx.executor("node-a", FakeIntake::new(IntakeMode::Ok));

        for day in 1..=3 {
            fx.clock.set(occurrence(day).with_timezone(&Utc));
            let report = executor.execute(&task, occurrence(day)).await;
            assert_eq!(report.outcome, ExecutionOutcome::Success);
            assert_eq!(report.task_completed, day == 3);
        }

        let stored = fx.repos.tasks.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.executed_count, 3);

        // 已完成的任务再次触发只会被跳过
        fx.clock.set(occurrence(4).with_timezone(&Utc));
        let report = executor.execute(&task, occurrence(4)).await;
        assert_eq!(report.outcome, ExecutionOutcome::Skipped);
        assert_eq!(
            fx.repos.tasks.get_by_id(1).await.unwrap().unwrap().executed_count,
            3
        );
    }

    #[tokio::test]
    async fn test_one_shot_completes_after_first_run() {
        let fx = Fixture::new();
        let task = ScheduledTask::builder(1, 100, "会议", "0 0 9 1 1 ? 2024")
            .schedule_type(reminder_core::models::ScheduleType::Once)
            .build();
        fx.insert(&task).await;
        let executor = fx.executor("node-a", FakeIntake::new(IntakeMode::Ok));

        let report = executor.execute(&task, occurrence(1)).await;
        assert!(report.task_completed);
    }

    #[tokio::test]
    async fn test_two_nodes_same_occurrence_exactly_one_runs() {
        let fx = Fixture::new();
        fx.insert(&daily_task(42)).await;
        let a = fx.executor("node-a", FakeIntake::slow());
        let b = fx.executor("node-b", FakeIntake::slow());
        let task = daily_task(42);

        let (ra, rb) = tokio::join!(a.execute(&task, occurrence(1)), b.execute(&task, occurrence(1)));
        let mut outcomes = vec![ra.outcome, rb.outcome];
        outcomes.sort_by_key(|o| o.as_str());
        assert_eq!(outcomes, vec![ExecutionOutcome::Skipped, ExecutionOutcome::Success]);

        let logs = fx.repos.execution_logs.list_by_task(42, 0, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        let skipped = logs
            .iter()
            .find(|l| l.outcome == ExecutionOutcome::Skipped)
            .unwrap();
        assert_eq!(skipped.error_message.as_deref(), Some(LOCK_DENIED_REASON));
        assert!(skipped.lock_holder.is_some());
        assert_eq!(
            fx.repos.tasks.get_by_id(42).await.unwrap().unwrap().executed_count,
            1
        );
    }

    #[tokio::test]
    async fn test_dispatch_failure_logs_failed_and_releases_lock() {
        let fx = Fixture::new();
        fx.insert(&daily_task(1)).await;
        let executor = fx.executor("node-a", FakeIntake::new(IntakeMode::Fail));

        let report = executor.execute(&daily_task(1), occurrence(1)).await;
        assert_eq!(report.outcome, ExecutionOutcome::Failed);

        let logs = fx.repos.execution_logs.list_by_task(1, 0, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].error_message.as_deref().unwrap().contains("数据库不可用"));
        assert_eq!(
            fx.repos.tasks.get_by_id(1).await.unwrap().unwrap().executed_count,
            0
        );
        assert!(!fx.lock.is_held("task_lock:1:202401010900").await.unwrap());
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_lock_released() {
        let fx = Fixture::new();
        fx.insert(&daily_task(1)).await;
        let executor = fx.executor("node-a", FakeIntake::new(IntakeMode::Panic));

        let report = executor.execute(&daily_task(1), occurrence(1)).await;
        assert_eq!(report.outcome, ExecutionOutcome::Failed);
        let logs = fx.repos.execution_logs.list_by_task(1, 0, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].error_message.as_deref().unwrap().contains("intake exploded"));
        assert!(!fx.lock.is_held("task_lock:1:202401010900").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_task_is_skipped_after_recheck() {
        let fx = Fixture::new();
        fx.insert(&daily_task(1)).await;
        fx.repos
            .tasks
            .update_status(1, TaskStatus::Disabled)
            .await
            .unwrap();
        let intake = FakeIntake::new(IntakeMode::Ok);
        let executor = fx.executor("node-a", intake.clone());

        // 调用方手里是过期的快照，执行器以存储为准
        let report = executor.execute(&daily_task(1), occurrence(1)).await;
        assert_eq!(report.outcome, ExecutionOutcome::Skipped);
        assert!(intake.received.lock().await.is_empty());

        let logs = fx.repos.execution_logs.list_by_task(1, 0, 10).await.unwrap();
        assert_eq!(
            logs[0].error_message.as_deref(),
            Some("任务状态不允许执行: status=disabled")
        );
    }

    /// 计数更新失败的任务仓储，其他操作转给内存实现
    struct CountFailingTasks {
        inner: Arc<dyn TaskRepository>,
    }

    #[async_trait]
    impl TaskRepository for CountFailingTasks {
        async fn create(&self, task: &ScheduledTask) -> ReminderResult<()> {
            self.inner.create(task).await
        }

        async fn get_by_id(&self, id: i64) -> ReminderResult<Option<ScheduledTask>> {
            self.inner.get_by_id(id).await
        }

        async fn update(&self, task: &ScheduledTask) -> ReminderResult<()> {
            self.inner.update(task).await
        }

        async fn list_by_owner(
            &self,
            owner_id: i64,
            filter: &reminder_core::models::TaskFilter,
        ) -> ReminderResult<Vec<ScheduledTask>> {
            self.inner.list_by_owner(owner_id, filter).await
        }

        async fn count_by_owner(
            &self,
            owner_id: i64,
            filter: &reminder_core::models::TaskFilter,
        ) -> ReminderResult<i64> {
            self.inner.count_by_owner(owner_id, filter).await
        }

        async fn list_enabled(&self) -> ReminderResult<Vec<ScheduledTask>> {
            self.inner.list_enabled().await
        }

        async fn increment_executed_count(&self, _id: i64) -> ReminderResult<i32> {
            Err(ReminderError::Internal("连接已断开".to_string()))
        }

        async fn update_status(&self, id: i64, status: TaskStatus) -> ReminderResult<()> {
            self.inner.update_status(id, status).await
        }

        async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> ReminderResult<()> {
            self.inner.soft_delete(id, at).await
        }
    }

    #[tokio::test]
    async fn test_bookkeeping_failure_after_dispatch_is_still_success() {
        let mut fx = Fixture::new();
        fx.insert(&daily_task(1)).await;
        fx.repos.tasks = Arc::new(CountFailingTasks {
            inner: fx.repos.tasks.clone(),
        });
        let intake = FakeIntake::new(IntakeMode::Ok);
        let executor = fx.executor("node-a", intake.clone());

        let report = executor.execute(&daily_task(1), occurrence(1)).await;
        assert_eq!(report.outcome, ExecutionOutcome::Success);
        assert_eq!(report.message_id, Some(1000));
        assert!(!report.task_completed);
        assert_eq!(intake.received.lock().await.len(), 1);

        let logs = fx.repos.execution_logs.list_by_task(1, 0, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, ExecutionOutcome::Success);
        assert_eq!(logs[0].message_id, Some(1000));
        assert!(logs[0].error_message.as_deref().unwrap().contains("连接已断开"));
        assert!(!fx.lock.is_held("task_lock:1:202401010900").await.unwrap());
    }
}
