//! 提醒系统基础设施层
//!
//! 仓储、分布式锁、消息队列的具体实现，以及日志与指标工具。

pub mod database;
pub mod factory;
pub mod lock;
pub mod observability;
pub mod queue;
pub mod redis_connection;
pub mod testing;

pub use database::{DatabaseManager, Repositories};
pub use factory::{BackendFactory, Backends};
pub use lock::{InMemoryLock, RedisLock};
pub use observability::{MetricsCollector, StructuredLogger};
pub use queue::{InMemoryMessageQueue, InMemoryRetryQueue, RedisRetryQueue, RedisStreamMessageQueue};
pub use redis_connection::RedisConnectionManager;
