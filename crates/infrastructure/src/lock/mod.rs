//! 分布式锁实现
//!
//! - [`InMemoryLock`]: 进程内实现
//! - [`RedisLock`]: 基于Redis的集群实现

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryLock;
pub use self::redis::RedisLock;

use std::time::Duration;

/// 等待期内重试获取的间隔，另加随机抖动
pub(crate) const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);
