//! 本节点的定时器注册表
//!
//! 每个 `(task_id, for_date)` 至多一个定时器，重复调度时替换旧的。
//! 这里只做本地记账，多个节点各自持有相同的定时器，同一次触发只执行一次
//! 由分布式锁保证。

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use reminder_core::{
    models::{ExecutionOutcome, ScheduledTask},
    traits::Clock,
    ReminderResult,
};
use reminder_infrastructure::{MetricsCollector, StructuredLogger};

use crate::cron_utils::CronEvaluator;

/// 定时器键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub task_id: i64,
    pub for_date: NaiveDate,
}

impl TimerKey {
    pub fn new(task_id: i64, for_date: NaiveDate) -> Self {
        Self { task_id, for_date }
    }
}

impl std::fmt::Display for TimerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task_{}_{}", self.task_id, self.for_date)
    }
}

/// 单次触发的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub task_id: i64,
    pub outcome: ExecutionOutcome,
    pub message_id: Option<i64>,
    /// 任务在本次执行后进入终态，不应再调度
    pub task_completed: bool,
}

impl ExecutionReport {
    pub fn skipped(task_id: i64) -> Self {
        Self {
            task_id,
            outcome: ExecutionOutcome::Skipped,
            message_id: None,
            task_completed: false,
        }
    }
}

/// 定时器到期时的处理者
#[async_trait]
pub trait OccurrenceHandler: Send + Sync {
    async fn handle(&self, task: ScheduledTask, occurrence: DateTime<Tz>) -> ExecutionReport;
}

struct TimerEntry {
    generation: u64,
    fire_at: DateTime<Utc>,
    /// 触发后置空，执行中的定时器不可被取消
    cancel: Option<oneshot::Sender<()>>,
}

struct SchedulerInner {
    timers: Mutex<HashMap<TimerKey, TimerEntry>>,
    handler: Arc<dyn OccurrenceHandler>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    next_generation: AtomicU64,
    in_flight: AtomicUsize,
    shutting_down: AtomicBool,
}

/// 任务调度器
///
/// 克隆后共享同一个注册表。
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

/// 任务时区 `date` 零点前一秒，cron求值严格取之后的时间，零点本身也能命中
fn day_start_cursor(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    let start = match tz.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => midnight.and_utc(),
    };
    start - ChronoDuration::seconds(1)
}

impl TaskScheduler {
    pub fn new(
        handler: Arc<dyn OccurrenceHandler>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                timers: Mutex::new(HashMap::new()),
                handler,
                clock,
                metrics,
                next_generation: AtomicU64::new(1),
                in_flight: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// 为任务在 `for_date` 注册下一次触发
    ///
    /// 触发时间不早于 `for_date` 在任务时区的零点。已存在同键定时器时先取消再替换。任务不可执行或表达式已无后续触发时
    /// 返回 `Ok(None)` 且不注册。
    pub async fn schedule(
        &self,
        task: &ScheduledTask,
        for_date: NaiveDate,
    ) -> ReminderResult<Option<DateTime<Tz>>> {
        let key = TimerKey::new(task.id, for_date);
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            debug!("调度器正在关闭，忽略调度请求: {}", key);
            return Ok(None);
        }

        if !task.can_execute_on(for_date) {
            warn!(
                "任务无法执行，跳过调度: task_id={}, status={}",
                task.id,
                task.status.as_str()
            );
            self.cancel(&key).await;
            return Ok(None);
        }

        let tz = task.tz()?;
        let evaluator = CronEvaluator::new(&task.cron_expression)?;
        let after = std::cmp::max(self.inner.clock.now(), day_start_cursor(tz, for_date));
        let Some(next) = evaluator.next_fire_after(tz, after) else {
            warn!(
                "无法计算下次执行时间: task_id={}, cron={}",
                task.id, task.cron_expression
            );
            self.cancel(&key).await;
            return Ok(None);
        };

        let mut timers = self.inner.timers.lock().await;
        self.arm(&mut timers, key, task.clone(), next);
        drop(timers);

        StructuredLogger::log_occurrence_scheduled(
            task.id,
            &task.name,
            next.with_timezone(&Utc),
            tz.name(),
        );
        Ok(Some(next))
    }

    /// 在已持有注册表锁的情况下放置定时器
    fn arm(
        &self,
        timers: &mut HashMap<TimerKey, TimerEntry>,
        key: TimerKey,
        task: ScheduledTask,
        occurrence: DateTime<Tz>,
    ) {
        if let Some(previous) = timers.remove(&key) {
            if let Some(cancel) = previous.cancel {
                let _ = cancel.send(());
            }
            debug!("替换已存在的定时器: {}", key);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let fire_at = occurrence.with_timezone(&Utc);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        timers.insert(
            key,
            TimerEntry {
                generation,
                fire_at,
                cancel: Some(cancel_tx),
            },
        );
        self.inner.metrics.update_scheduled_timers(timers.len());

        let delay = (fire_at - self.inner.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let scheduler = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx => {
                    debug!("定时器已取消: {}", key);
                    return;
                }
            }
            scheduler.fire(key, generation, task, occurrence).await;
        });
    }

    async fn fire(
        &self,
        key: TimerKey,
        generation: u64,
        task: ScheduledTask,
        occurrence: DateTime<Tz>,
    ) {
        {
            let mut timers = self.inner.timers.lock().await;
            match timers.get_mut(&key) {
                Some(entry) if entry.generation == generation => entry.cancel = None,
                _ => return,
            }
        }

        info!(
            "定时器触发: task_id={}, occurrence={}",
            task.id,
            occurrence.to_rfc3339()
        );
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let report = self
            .inner
            .handler
            .handle(task.clone(), occurrence.clone())
            .await;
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        if report.task_completed {
            info!("任务已完成，取消剩余调度: task_id={}", task.id);
            self.cancel_all_for_task(task.id).await;
            return;
        }
        self.rearm(key, generation, task, occurrence).await;
    }

    /// 触发后为同一键安排下一次
    ///
    /// 执行期间键被取消或替换时不再安排。
    async fn rearm(
        &self,
        key: TimerKey,
        generation: u64,
        task: ScheduledTask,
        occurrence: DateTime<Tz>,
    ) {
        let mut timers = self.inner.timers.lock().await;
        let still_ours = timers
            .get(&key)
            .is_some_and(|entry| entry.generation == generation);
        if !still_ours {
            return;
        }

        if self.inner.shutting_down.load(Ordering::SeqCst) {
            timers.remove(&key);
            self.inner.metrics.update_scheduled_timers(timers.len());
            return;
        }

        let after = std::cmp::max(self.inner.clock.now(), occurrence.with_timezone(&Utc));
        let next = CronEvaluator::new(&task.cron_expression)
            .ok()
            .and_then(|evaluator| evaluator.next_fire_after(occurrence.timezone(), after));

        match next {
            Some(next) => {
                debug!("重新安排下一次触发: {} -> {}", key, next.to_rfc3339());
                self.arm(&mut timers, key, task, next);
            }
            None => {
                timers.remove(&key);
                self.inner.metrics.update_scheduled_timers(timers.len());
            }
        }
    }

    /// 取消单个定时器，不影响已经在执行的触发
    pub async fn cancel(&self, key: &TimerKey) -> bool {
        let mut timers = self.inner.timers.lock().await;
        let removed = Self::remove_entry(&mut timers, key);
        self.inner.metrics.update_scheduled_timers(timers.len());
        if removed {
            info!("取消任务定时器: {}", key);
        }
        removed
    }

    /// 取消某个任务的所有定时器，返回取消数量
    pub async fn cancel_all_for_task(&self, task_id: i64) -> usize {
        let mut timers = self.inner.timers.lock().await;
        let keys: Vec<TimerKey> = timers
            .keys()
            .filter(|key| key.task_id == task_id)
            .copied()
            .collect();
        for key in &keys {
            Self::remove_entry(&mut timers, key);
        }
        self.inner.metrics.update_scheduled_timers(timers.len());
        if !keys.is_empty() {
            info!("取消任务的全部定时器: task_id={}, count={}", task_id, keys.len());
        }
        keys.len()
    }

    pub async fn cancel_all(&self) -> usize {
        let mut timers = self.inner.timers.lock().await;
        let count = timers.len();
        info!("清理所有定时器，当前数量: {}", count);
        for (_, entry) in timers.drain() {
            if let Some(cancel) = entry.cancel {
                let _ = cancel.send(());
            }
        }
        self.inner.metrics.update_scheduled_timers(0);
        count
    }

    fn remove_entry(timers: &mut HashMap<TimerKey, TimerEntry>, key: &TimerKey) -> bool {
        match timers.remove(key) {
            Some(entry) => {
                if let Some(cancel) = entry.cancel {
                    let _ = cancel.send(());
                }
                true
            }
            None => false,
        }
    }

    pub async fn timer_count(&self) -> usize {
        self.inner.timers.lock().await.len()
    }

    pub async fn is_scheduled(&self, key: &TimerKey) -> bool {
        self.inner.timers.lock().await.contains_key(key)
    }

    /// 已注册的键及其触发时间，按键排序
    pub async fn snapshot(&self) -> Vec<(TimerKey, DateTime<Utc>)> {
        let timers = self.inner.timers.lock().await;
        let mut entries: Vec<(TimerKey, DateTime<Utc>)> =
            timers.iter().map(|(k, e)| (*k, e.fire_at)).collect();
        entries.sort();
        entries
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// 停止接受新调度并取消所有定时器，等待执行中的触发结束
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.cancel_all().await;

        let waited = tokio::time::timeout(timeout, async {
            while self.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if waited.is_err() {
            error!("等待执行中的任务超时，仍有 {} 个未完成", self.in_flight());
        } else {
            info!("任务调度器已停止");
        }
    }
}
