use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use reminder_core::{
    traits::{Clock, SystemClock},
    AppConfig, IdGenerator,
};
use reminder_dispatcher::{DailyRefreshCycle, ExecutorConfig, TaskExecutor, TaskScheduler};
use reminder_infrastructure::{BackendFactory, Backends, MetricsCollector};
use reminder_worker::{
    FanoutConsumer, FanoutProcessor, FanoutRouter, FanoutSettings, MessageDispatcher, RetryWorker,
    SenderRegistry,
};

/// 调度器关闭时等待执行中触发的上限
const SCHEDULER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 每日刷新、本地定时器和任务执行
    Scheduler,
    /// 扇出消费者和重试工作器
    Fanout,
    All,
}

impl AppMode {
    pub fn runs_scheduler(&self) -> bool {
        matches!(self, AppMode::Scheduler | AppMode::All)
    }

    pub fn runs_fanout(&self) -> bool {
        matches!(self, AppMode::Fanout | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    node_id: String,
    backends: Backends,
    clock: Arc<dyn Clock>,
    ids: Arc<IdGenerator>,
    metrics: Arc<MetricsCollector>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode, node_id: String) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}, 节点: {}", mode, node_id);

        let backends = BackendFactory::create(&config, &node_id)
            .await
            .context("初始化存储与队列失败")?;

        Ok(Self {
            ids: Arc::new(IdGenerator::for_node(&node_id)),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(MetricsCollector::new()),
            config,
            mode,
            node_id,
            backends,
        })
    }

    /// 受理入口，定时任务执行器和外部调用共用
    fn message_dispatcher(&self) -> Arc<MessageDispatcher> {
        let repos = &self.backends.repositories;
        Arc::new(MessageDispatcher::new(
            repos.users.clone(),
            repos.messages.clone(),
            self.backends.queue.clone(),
            self.config.queue.fanout_queue.clone(),
            self.ids.clone(),
            self.clock.clone(),
            self.metrics.clone(),
        ))
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);
        let mut handles = Vec::new();

        let scheduler = if self.mode.runs_scheduler() && self.config.scheduler.enabled {
            let (scheduler, scheduler_handles) = self.start_scheduler(&shutdown_rx)?;
            handles.extend(scheduler_handles);
            Some(scheduler)
        } else {
            None
        };

        if self.mode.runs_fanout() && self.config.fanout.enabled {
            handles.extend(self.start_fanout(&shutdown_rx)?);
        }

        if handles.is_empty() {
            warn!("当前模式下没有启用任何组件，请检查配置");
        }

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        if let Some(scheduler) = scheduler {
            scheduler.shutdown(SCHEDULER_SHUTDOWN_TIMEOUT).await;
        }
        futures::future::join_all(handles).await;

        if let Some(database) = &self.backends.database {
            database.close().await;
        }
        info!("应用已停止");
        Ok(())
    }

    fn start_scheduler(
        &self,
        shutdown_rx: &broadcast::Receiver<()>,
    ) -> Result<(TaskScheduler, Vec<JoinHandle<()>>)> {
        info!("启动调度服务: node_id={}", self.node_id);
        let repos = &self.backends.repositories;

        let executor = Arc::new(TaskExecutor::new(
            repos.tasks.clone(),
            repos.execution_logs.clone(),
            self.backends.lock.clone(),
            self.message_dispatcher(),
            self.clock.clone(),
            self.metrics.clone(),
            ExecutorConfig::from_lock_config(&self.config.lock, self.node_id.clone()),
        ));
        let scheduler = TaskScheduler::new(executor, self.clock.clone(), self.metrics.clone());
        let cycle = Arc::new(
            DailyRefreshCycle::new(
                repos.tasks.clone(),
                scheduler.clone(),
                self.clock.clone(),
                &self.config.scheduler,
            )
            .context("创建每日刷新循环失败")?,
        );

        let refresh = {
            let cycle = cycle.clone();
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { cycle.run(rx).await })
        };
        let monitor = {
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { cycle.run_monitor(rx).await })
        };

        Ok((scheduler, vec![refresh, monitor]))
    }

    fn start_fanout(&self, shutdown_rx: &broadcast::Receiver<()>) -> Result<Vec<JoinHandle<()>>> {
        let repos = &self.backends.repositories;
        let senders = SenderRegistry::from_config(&self.config.senders)
            .context("初始化推送通道失败")?;

        let processor = Arc::new(FanoutProcessor::new(
            repos.destinations.clone(),
            FanoutRouter::new(repos.tag_routes.clone()),
            Arc::new(senders),
            repos.messages.clone(),
            repos.delivery_attempts.clone(),
            self.backends.retry_queue.clone(),
            self.ids.clone(),
            self.clock.clone(),
            self.metrics.clone(),
            FanoutSettings::from_config(&self.config.fanout),
        ));

        let queue_config = &self.config.queue;
        let poll_interval = Duration::from_millis(queue_config.poll_interval_millis);
        let mut handles = Vec::new();

        for index in 0..self.config.fanout.consumers {
            let consumer = FanoutConsumer::new(
                format!("{}-{}", self.node_id, index),
                self.backends.queue.clone(),
                queue_config.fanout_queue.clone(),
                processor.clone(),
                queue_config.batch_size,
                poll_interval,
            );
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { consumer.run(rx).await }));
        }

        let retry_worker = RetryWorker::new(
            processor,
            self.backends.retry_queue.clone(),
            repos.messages.clone(),
            repos.destinations.clone(),
            Duration::from_secs(self.config.fanout.retry_poll_interval_seconds),
            queue_config.batch_size,
        );
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move { retry_worker.run(rx).await }));

        info!(
            "扇出服务已启动: consumers={}, queue={}",
            self.config.fanout.consumers, queue_config.fanout_queue
        );
        Ok(handles)
    }
}
