pub mod app_config;
pub mod coordination;
pub mod database;
pub mod scheduler_fanout;
pub mod senders;

pub use app_config::AppConfig;
pub use coordination::{BackendKind, LockConfig, QueueConfig, RedisConfig};
pub use database::DatabaseConfig;
pub use scheduler_fanout::{FanoutConfig, SchedulerConfig};
pub use senders::{LoggingConfig, SendersConfig, SmtpConfig};
