//! 每日刷新：启动时和每天零点清空本地定时器，按当天可执行的任务重新调度

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use reminder_core::{
    config::SchedulerConfig,
    models::{parse_timezone, ScheduledTask},
    traits::{Clock, TaskRepository},
    ReminderResult,
};
use reminder_infrastructure::StructuredLogger;

use crate::scheduler::TaskScheduler;

/// 一次刷新的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub loaded: usize,
    pub scheduled: usize,
    pub skipped: usize,
}

pub struct DailyRefreshCycle {
    tasks: Arc<dyn TaskRepository>,
    scheduler: TaskScheduler,
    clock: Arc<dyn Clock>,
    default_tz: Tz,
    monitor_interval: Duration,
    timer_warn_threshold: usize,
}

impl DailyRefreshCycle {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        scheduler: TaskScheduler,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> ReminderResult<Self> {
        Ok(Self {
            tasks,
            scheduler,
            clock,
            default_tz: parse_timezone(&config.default_timezone)?,
            monitor_interval: Duration::from_secs(config.monitor_interval_seconds),
            timer_warn_threshold: config.timer_warn_threshold,
        })
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// 以每个任务自己时区的"今天"刷新
    ///
    /// 刷新只在默认时区零点进行。任务时区的日期在下次刷新前就会翻页时，
    /// 今天不可执行而明天可执行的任务按明天调度，免得漏掉窗口开始的那一天。
    pub async fn refresh_now(&self) -> ReminderResult<RefreshSummary> {
        let now = self.clock.now();
        let next_refresh = self.next_midnight(now);
        let label = now.with_timezone(&self.default_tz).date_naive().to_string();
        self.refresh_with(&label, |task| {
            let today = task.local_date(now)?;
            let upcoming = task.local_date(next_refresh)?;
            if upcoming != today && !task.can_execute_on(today) && task.can_execute_on(upcoming) {
                Ok(upcoming)
            } else {
                Ok(today)
            }
        })
        .await
    }

    /// 以指定日期刷新所有任务
    pub async fn refresh_for(&self, date: NaiveDate) -> ReminderResult<RefreshSummary> {
        self.refresh_with(&date.to_string(), |_| Ok(date)).await
    }

    async fn refresh_with<F>(&self, label: &str, date_of: F) -> ReminderResult<RefreshSummary>
    where
        F: Fn(&ScheduledTask) -> ReminderResult<NaiveDate>,
    {
        let started = Instant::now();
        info!("开始每日任务刷新: {}", label);

        let tasks = self.tasks.list_enabled().await?;
        let cancelled = self.scheduler.cancel_all().await;
        debug!("已清理旧定时器: {}", cancelled);

        let mut summary = RefreshSummary {
            loaded: tasks.len(),
            ..Default::default()
        };

        for task in &tasks {
            let scheduled = match date_of(task) {
                Ok(date) if task.can_execute_on(date) => self.scheduler.schedule(task, date).await,
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            };

            match scheduled {
                Ok(Some(_)) => summary.scheduled += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    error!("调度任务失败: task_id={}, error={}", task.id, e);
                    summary.skipped += 1;
                }
            }
        }

        StructuredLogger::log_daily_refresh_finished(
            label,
            summary.scheduled,
            summary.skipped,
            started.elapsed().as_millis(),
        );
        Ok(summary)
    }

    /// 默认时区下一个零点
    pub fn next_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tomorrow = now.with_timezone(&self.default_tz).date_naive() + ChronoDuration::days(1);
        let midnight = tomorrow.and_time(chrono::NaiveTime::MIN);
        match self.default_tz.from_local_datetime(&midnight).earliest() {
            Some(local) => local.with_timezone(&Utc),
            // 零点落在夏令时间隙里，取间隙之后
            None => midnight.and_utc() + ChronoDuration::hours(1),
        }
    }

    /// 启动时刷新一次，此后每天零点刷新，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if let Err(e) = self.refresh_now().await {
            error!("启动时刷新任务失败: {}", e);
        }

        loop {
            let now = self.clock.now();
            let next = self.next_midnight(now);
            // 多等一秒，确保醒来时已经跨过零点
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO) + Duration::from_secs(1);
            debug!("下次每日刷新时间: {}", next.to_rfc3339());

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.refresh_now().await {
                        error!("每日刷新任务失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("每日刷新循环收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 定期输出本地定时器数量
    pub async fn run_monitor(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.monitor_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.report_timers().await;
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// 返回当前定时器数量，超过阈值时告警
    pub async fn report_timers(&self) -> usize {
        let count = self.scheduler.timer_count().await;
        if count > self.timer_warn_threshold {
            warn!(
                "定时器数量过多: count={}, threshold={}",
                count, self.timer_warn_threshold
            );
        } else {
            info!("当前调度中的定时器数量: {}", count);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ExecutionReport, OccurrenceHandler, TimerKey};
    use async_trait::async_trait;
    use reminder_core::models::TaskStatus;
    use reminder_core::traits::ManualClock;
    use reminder_infrastructure::{MetricsCollector, Repositories};

    struct NoopHandler;

    #[async_trait]
    impl OccurrenceHandler for NoopHandler {
        async fn handle(&self, task: ScheduledTask, _occurrence: DateTime<Tz>) -> ExecutionReport {
            ExecutionReport::skipped(task.id)
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    async fn setup() -> (Repositories, DailyRefreshCycle) {
        let repos = Repositories::in_memory();
        // 上海 2024-01-01 08:00
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let scheduler = TaskScheduler::new(
            Arc::new(NoopHandler),
            clock.clone(),
            Arc::new(MetricsCollector::new()),
        );
        let cycle = DailyRefreshCycle::new(
            repos.tasks.clone(),
            scheduler,
            clock,
            &SchedulerConfig {
                timer_warn_threshold: 1,
                ..Default::default()
            },
        )
        .unwrap();
        (repos, cycle)
    }

    #[tokio::test]
    async fn test_refresh_twice_yields_same_timers() {
        let (repos, cycle) = setup().await;
        for id in 1..=3 {
            repos
                .tasks
                .create(&ScheduledTask::builder(id, 100, "提醒", "0 0 9 * * *").build())
                .await
                .unwrap();
        }

        let first = cycle.refresh_for(date(1)).await.unwrap();
        let snapshot = cycle.scheduler().snapshot().await;
        let second = cycle.refresh_for(date(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.scheduled, 3);
        assert_eq!(cycle.scheduler().snapshot().await, snapshot);
        assert_eq!(cycle.scheduler().timer_count().await, 3);
    }

    #[tokio::test]
    async fn test_refresh_only_schedules_eligible_tasks() {
        let (repos, cycle) = setup().await;
        repos
            .tasks
            .create(&ScheduledTask::builder(1, 100, "正常", "0 0 9 * * *").build())
            .await
            .unwrap();
        repos
            .tasks
            .create(
                &ScheduledTask::builder(2, 100, "未开始", "0 0 9 * * *")
                    .window(Some(date(5)), None)
                    .build(),
            )
            .await
            .unwrap();
        repos
            .tasks
            .create(
                &ScheduledTask::builder(3, 100, "已耗尽", "0 0 9 * * *")
                    .max_executions(2)
                    .executed_count(2)
                    .build(),
            )
            .await
            .unwrap();
        repos
            .tasks
            .create(&ScheduledTask::builder(4, 100, "坏表达式", "0 0 99 * * *").build())
            .await
            .unwrap();

        let summary = cycle.refresh_for(date(1)).await.unwrap();
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.loaded - summary.scheduled, summary.skipped);
        assert!(cycle.scheduler().is_scheduled(&TimerKey::new(1, date(1))).await);
        assert!(!cycle.scheduler().is_scheduled(&TimerKey::new(2, date(1))).await);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_changes() {
        let (repos, cycle) = setup().await;
        repos
            .tasks
            .create(&ScheduledTask::builder(1, 100, "a", "0 0 9 * * *").build())
            .await
            .unwrap();
        cycle.refresh_now().await.unwrap();
        assert!(cycle.scheduler().is_scheduled(&TimerKey::new(1, date(1))).await);

        repos.tasks.update_status(1, TaskStatus::Disabled).await.unwrap();
        repos
            .tasks
            .create(&ScheduledTask::builder(2, 100, "b", "0 0 10 * * *").build())
            .await
            .unwrap();
        cycle.refresh_now().await.unwrap();

        let keys: Vec<TimerKey> = cycle
            .scheduler()
            .snapshot()
            .await
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![TimerKey::new(2, date(1))]);
        assert_eq!(cycle.report_timers().await, 1);
    }

    #[tokio::test]
    async fn test_refresh_arms_task_whose_window_opens_before_next_refresh() {
        let (repos, cycle) = setup().await;
        // 上海 01-01 08:00 时洛杉矶还是 12-31 16:00，下次刷新在洛杉矶 01-01 08:00
        repos
            .tasks
            .create(
                &ScheduledTask::builder(1, 100, "洛杉矶早上", "0 0 7 * * *")
                    .timezone("America/Los_Angeles")
                    .window(Some(date(1)), None)
                    .build(),
            )
            .await
            .unwrap();
        repos
            .tasks
            .create(
                &ScheduledTask::builder(2, 100, "洛杉矶晚上", "0 0 20 * * *")
                    .timezone("America/Los_Angeles")
                    .window(Some(date(1)), None)
                    .build(),
            )
            .await
            .unwrap();

        let summary = cycle.refresh_now().await.unwrap();
        assert_eq!(summary.scheduled, 2);

        let snapshot = cycle.scheduler().snapshot().await;
        assert_eq!(
            snapshot,
            vec![
                (
                    TimerKey::new(1, date(1)),
                    // 洛杉矶 01-01 07:00
                    Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap()
                ),
                (
                    TimerKey::new(2, date(1)),
                    // 洛杉矶 01-01 20:00，而不是窗口开始前的 12-31 20:00
                    Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_next_midnight_in_default_timezone() {
        let (_, cycle) = setup().await;
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // 上海 2024-01-02 00:00 = UTC 2024-01-01 16:00
        assert_eq!(
            cycle.next_midnight(now),
            Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap()
        );
        let just_after = Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 1).unwrap();
        assert_eq!(
            cycle.next_midnight(just_after),
            Utc.with_ymd_and_hms(2024, 1, 2, 16, 0, 0).unwrap()
        );
    }
}
