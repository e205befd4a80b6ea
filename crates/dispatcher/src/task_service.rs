use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use reminder_core::{
    models::{ExecutionLogEntry, ScheduledTask, TaskFilter, TaskSpec, TaskStatus},
    traits::{Clock, ExecutionLogRepository, TaskRepository},
    IdGenerator, ReminderError, ReminderResult,
};

use crate::cron_utils::CronEvaluator;
use crate::executor::TaskExecutor;
use crate::scheduler::{ExecutionReport, TaskScheduler};

/// 分页结果
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// 任务管理服务
///
/// 每个操作都校验任务归属；写操作之后同步更新本节点的定时器。
/// 其他节点要到下一次每日刷新才会看到变更。
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    execution_logs: Arc<dyn ExecutionLogRepository>,
    scheduler: TaskScheduler,
    executor: Arc<TaskExecutor>,
    clock: Arc<dyn Clock>,
    ids: Arc<IdGenerator>,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        execution_logs: Arc<dyn ExecutionLogRepository>,
        scheduler: TaskScheduler,
        executor: Arc<TaskExecutor>,
        clock: Arc<dyn Clock>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            tasks,
            execution_logs,
            scheduler,
            executor,
            clock,
            ids,
        }
    }

    #[instrument(skip(self, spec), fields(owner_id = owner_id))]
    pub async fn create(&self, owner_id: i64, spec: TaskSpec) -> ReminderResult<ScheduledTask> {
        Self::validate(&spec)?;

        let now = self.clock.now();
        let task = spec.into_task(self.ids.next_id(), owner_id, now);
        self.tasks.create(&task).await?;
        info!("创建定时任务: task_id={}, name={}", task.id, task.name);

        self.schedule_today(&task).await;
        Ok(task)
    }

    pub async fn update(
        &self,
        owner_id: i64,
        task_id: i64,
        spec: TaskSpec,
    ) -> ReminderResult<ScheduledTask> {
        Self::validate(&spec)?;
        let mut task = self.load_owned(owner_id, task_id).await?;

        spec.apply_to(&mut task, self.clock.now());
        self.tasks.update(&task).await?;
        info!("更新定时任务: task_id={}", task_id);

        self.scheduler.cancel_all_for_task(task_id).await;
        self.schedule_today(&task).await;
        Ok(task)
    }

    /// 启用或禁用，其他目标状态由系统维护，不接受外部设置
    pub async fn set_status(
        &self,
        owner_id: i64,
        task_id: i64,
        status: TaskStatus,
    ) -> ReminderResult<ScheduledTask> {
        if !matches!(status, TaskStatus::Enabled | TaskStatus::Disabled) {
            return Err(ReminderError::validation(format!(
                "不支持设置的任务状态: {}",
                status.as_str()
            )));
        }

        let mut task = self.load_owned(owner_id, task_id).await?;
        if !matches!(task.status, TaskStatus::Enabled | TaskStatus::Disabled) {
            return Err(ReminderError::validation(format!(
                "任务当前状态为{}，不能再启用或禁用",
                task.status.as_str()
            )));
        }
        self.tasks.update_status(task_id, status).await?;
        task.status = status;
        info!("任务状态变更: task_id={}, status={}", task_id, status.as_str());

        match status {
            TaskStatus::Enabled => self.schedule_today(&task).await,
            _ => {
                self.scheduler.cancel_all_for_task(task_id).await;
            }
        }
        Ok(task)
    }

    /// 批量变更状态，返回成功数量，单个失败不影响其余
    pub async fn batch_set_status(
        &self,
        owner_id: i64,
        task_ids: &[i64],
        status: TaskStatus,
    ) -> ReminderResult<usize> {
        let mut changed = 0;
        for &task_id in task_ids {
            match self.set_status(owner_id, task_id, status).await {
                Ok(_) => changed += 1,
                Err(e) if e.is_validation() => return Err(e),
                Err(e) => warn!("批量变更状态失败: task_id={}, error={}", task_id, e),
            }
        }
        Ok(changed)
    }

    pub async fn delete(&self, owner_id: i64, task_id: i64) -> ReminderResult<()> {
        self.load_owned(owner_id, task_id).await?;
        self.tasks.soft_delete(task_id, self.clock.now()).await?;
        self.scheduler.cancel_all_for_task(task_id).await;
        info!("删除定时任务: task_id={}", task_id);
        Ok(())
    }

    /// 立即执行一次，走与定时触发相同的加锁和日志路径
    pub async fn execute_now(&self, owner_id: i64, task_id: i64) -> ReminderResult<ExecutionReport> {
        let task = self.load_owned(owner_id, task_id).await?;
        info!("手动执行任务: task_id={}", task_id);

        let report = self.executor.execute_now(&task).await?;
        if report.task_completed {
            self.scheduler.cancel_all_for_task(task_id).await;
        }
        Ok(report)
    }

    pub async fn get(&self, owner_id: i64, task_id: i64) -> ReminderResult<ScheduledTask> {
        self.load_owned(owner_id, task_id).await
    }

    pub async fn list(
        &self,
        owner_id: i64,
        filter: &TaskFilter,
    ) -> ReminderResult<Page<ScheduledTask>> {
        let filter = normalize_page(filter);
        let items = self.tasks.list_by_owner(owner_id, &filter).await?;
        let total = self.tasks.count_by_owner(owner_id, &filter).await?;
        Ok(Page {
            items,
            total,
            offset: filter.offset,
            limit: filter.limit,
        })
    }

    pub async fn count(&self, owner_id: i64, filter: &TaskFilter) -> ReminderResult<i64> {
        self.tasks.count_by_owner(owner_id, filter).await
    }

    pub async fn execution_logs(
        &self,
        owner_id: i64,
        task_id: i64,
        offset: i64,
        limit: i64,
    ) -> ReminderResult<Page<ExecutionLogEntry>> {
        self.load_owned(owner_id, task_id).await?;
        let offset = offset.max(0);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let items = self.execution_logs.list_by_task(task_id, offset, limit).await?;
        let total = self.execution_logs.count_by_task(task_id).await?;
        Ok(Page {
            items,
            total,
            offset,
            limit,
        })
    }

    /// 预览表达式接下来的触发时间
    pub fn preview(
        &self,
        cron_expression: &str,
        tz: Tz,
        count: usize,
    ) -> ReminderResult<Vec<DateTime<Tz>>> {
        let evaluator = CronEvaluator::new(cron_expression)?;
        Ok(evaluator.upcoming_times(tz, self.clock.now(), count.min(MAX_PREVIEW)))
    }

    fn validate(spec: &TaskSpec) -> ReminderResult<()> {
        spec.validate_fields()?;
        CronEvaluator::validate_cron_expression(&spec.cron_expression)
    }

    async fn load_owned(&self, owner_id: i64, task_id: i64) -> ReminderResult<ScheduledTask> {
        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .filter(|t| t.deleted_at.is_none())
            .ok_or(ReminderError::TaskNotFound { id: task_id })?;
        if task.owner_id != owner_id {
            warn!(
                "越权访问任务: task_id={}, owner_id={}, caller={}",
                task_id, task.owner_id, owner_id
            );
            return Err(ReminderError::PermissionDenied(format!("任务 {task_id}")));
        }
        Ok(task)
    }

    /// 按任务时区的今天调度；开始日期在未来的任务留给每日刷新
    async fn schedule_today(&self, task: &ScheduledTask) {
        let today = match task.local_date(self.clock.now()) {
            Ok(today) => today,
            Err(e) => {
                warn!("任务时区无效，暂不调度: task_id={}, error={}", task.id, e);
                return;
            }
        };
        if let Err(e) = self.scheduler.schedule(task, today).await {
            warn!("任务调度失败: task_id={}, error={}", task.id, e);
        }
    }
}

const MAX_PAGE_SIZE: i64 = 100;
const MAX_PREVIEW: usize = 20;

fn normalize_page(filter: &TaskFilter) -> TaskFilter {
    TaskFilter {
        offset: filter.offset.max(0),
        limit: filter.limit.clamp(1, MAX_PAGE_SIZE),
        ..filter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::scheduler::{OccurrenceHandler, TimerKey};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use reminder_core::config::LockConfig;
    use reminder_core::models::{ExecutionOutcome, PushRequest, ScheduleType};
    use reminder_core::traits::{ManualClock, MessageIntake};
    use reminder_infrastructure::{InMemoryLock, MetricsCollector, Repositories};

    struct AcceptAll;

    #[async_trait]
    impl MessageIntake for AcceptAll {
        async fn submit(&self, _request: PushRequest) -> ReminderResult<i64> {
            Ok(77)
        }
    }

    struct Fixture {
        repos: Repositories,
        service: TaskService,
        scheduler: TaskScheduler,
    }

    fn fixture() -> Fixture {
        let repos = Repositories::in_memory();
        // 上海 2024-01-01 08:00
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let metrics = Arc::new(MetricsCollector::new());
        let executor = Arc::new(TaskExecutor::new(
            repos.tasks.clone(),
            repos.execution_logs.clone(),
            Arc::new(InMemoryLock::new()),
            Arc::new(AcceptAll),
            clock.clone(),
            metrics.clone(),
            ExecutorConfig::from_lock_config(&LockConfig::default(), "node-a"),
        ));
        let handler: Arc<dyn OccurrenceHandler> = executor.clone();
        let scheduler = TaskScheduler::new(handler, clock.clone(), metrics);
        let service = TaskService::new(
            repos.tasks.clone(),
            repos.execution_logs.clone(),
            scheduler.clone(),
            executor,
            clock,
            Arc::new(IdGenerator::new(1)),
        );
        Fixture {
            repos,
            service,
            scheduler,
        }
    }

    fn task_spec(cron: &str) -> TaskSpec {
        TaskSpec {
            name: "站会".to_string(),
            description: None,
            message_title: "站会提醒".to_string(),
            message_content: "十点站会".to_string(),
            message_url: None,
            tags: vec!["work".to_string()],
            schedule_type: ScheduleType::Daily,
            cron_expression: cron.to_string(),
            timezone: "Asia/Shanghai".to_string(),
            start_date: None,
            end_date: None,
            max_executions: -1,
        }
    }

    fn today_key(task_id: i64) -> TimerKey {
        TimerKey::new(task_id, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn test_create_schedules_immediately() {
        let fx = fixture();
        let task = fx.service.create(100, task_spec("0 0 10 * * ?")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Enabled);
        assert!(fx.scheduler.is_scheduled(&today_key(task.id)).await);
    }

    #[tokio::test]
    async fn test_create_with_future_start_is_not_scheduled() {
        let fx = fixture();
        let mut input = task_spec("0 0 10 * * ?");
        input.start_date = NaiveDate::from_ymd_opt(2024, 2, 1);
        let task = fx.service.create(100, input).await.unwrap();
        assert_eq!(fx.scheduler.timer_count().await, 0);
        assert!(fx.repos.tasks.get_by_id(task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let fx = fixture();
        assert!(fx.service.create(100, task_spec("0 10 * * *")).await.unwrap_err().is_validation());

        let mut bad_tz = task_spec("0 0 10 * * ?");
        bad_tz.timezone = "Mars/Base".to_string();
        assert!(fx.service.create(100, bad_tz).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_ownership_is_checked() {
        let fx = fixture();
        let task = fx.service.create(100, task_spec("0 0 10 * * ?")).await.unwrap();

        let err = fx.service.get(200, task.id).await.unwrap_err();
        assert!(matches!(err, ReminderError::PermissionDenied(_)));
        assert!(fx.service.delete(200, task.id).await.is_err());
        assert!(fx.service.get(100, 12345).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_disable_cancels_and_enable_reschedules() {
        let fx = fixture();
        let task = fx.service.create(100, task_spec("0 0 10 * * ?")).await.unwrap();

        fx.service
            .set_status(100, task.id, TaskStatus::Disabled)
            .await
            .unwrap();
        assert!(!fx.scheduler.is_scheduled(&today_key(task.id)).await);

        fx.service
            .set_status(100, task.id, TaskStatus::Enabled)
            .await
            .unwrap();
        assert!(fx.scheduler.is_scheduled(&today_key(task.id)).await);

        let err = fx
            .service
            .set_status(100, task.id, TaskStatus::Completed)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_update_reschedules_and_delete_cancels() {
        let fx = fixture();
        let task = fx.service.create(100, task_spec("0 0 10 * * ?")).await.unwrap();
        let before = fx.scheduler.snapshot().await;

        fx.service
            .update(100, task.id, task_spec("0 30 11 * * ?"))
            .await
            .unwrap();
        let after = fx.scheduler.snapshot().await;
        assert_eq!(after.len(), 1);
        assert_ne!(before[0].1, after[0].1);

        fx.service.delete(100, task.id).await.unwrap();
        assert_eq!(fx.scheduler.timer_count().await, 0);
        assert!(fx.service.get(100, task.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_execute_now_writes_log_and_completes_one_shot() {
        let fx = fixture();
        let mut input = task_spec("0 0 10 1 1 ? 2024");
        input.schedule_type = ScheduleType::Once;
        let task = fx.service.create(100, input).await.unwrap();
        assert!(fx.scheduler.is_scheduled(&today_key(task.id)).await);

        let report = fx.service.execute_now(100, task.id).await.unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Success);
        assert!(report.task_completed);
        assert_eq!(fx.scheduler.timer_count().await, 0);

        let page = fx.service.execution_logs(100, task.id, 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].message_id, Some(77));
        assert_eq!(fx.service.get(100, task.id).await.unwrap().status, TaskStatus::Completed);

        let err = fx
            .service
            .set_status(100, task.id, TaskStatus::Enabled)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fx.service.get(100, task.id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(fx.scheduler.timer_count().await, 0);
    }

    #[tokio::test]
    async fn test_list_and_batch_status() {
        let fx = fixture();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(fx.service.create(100, task_spec("0 0 10 * * ?")).await.unwrap().id);
        }
        fx.service.create(200, task_spec("0 0 10 * * ?")).await.unwrap();

        let changed = fx
            .service
            .batch_set_status(100, &ids[..2], TaskStatus::Disabled)
            .await
            .unwrap();
        assert_eq!(changed, 2);

        let disabled = TaskFilter {
            status: Some(TaskStatus::Disabled),
            ..Default::default()
        };
        assert_eq!(fx.service.count(100, &disabled).await.unwrap(), 2);

        let page = fx
            .service
            .list(
                100,
                &TaskFilter {
                    limit: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.limit, MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_preview() {
        let fx = fixture();
        let times = fx
            .service
            .preview("0 0 9 * * ?", chrono_tz::Asia::Shanghai, 3)
            .unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0].date_naive(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }
}
