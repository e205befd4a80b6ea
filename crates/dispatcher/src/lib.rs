pub mod cron_builder;
pub mod cron_utils;
pub mod daily_refresh;
pub mod executor;
pub mod scheduler;
pub mod task_service;

pub use cron_builder::{CronBuilder, ScheduleConfig};
pub use cron_utils::CronEvaluator;
pub use daily_refresh::{DailyRefreshCycle, RefreshSummary};
pub use executor::{ExecutorConfig, TaskExecutor};
pub use scheduler::{ExecutionReport, OccurrenceHandler, TaskScheduler, TimerKey};
pub use task_service::{Page, TaskService};
