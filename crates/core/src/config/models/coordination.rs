use serde::{Deserialize, Serialize};

/// 协调组件的后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            connection_timeout_seconds: 30,
            max_retry_attempts: 3,
            retry_delay_seconds: 1,
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!("Redis URL必须是redis://或rediss://格式"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow::anyhow!("Redis最大重试次数必须大于0"));
        }

        Ok(())
    }
}

/// 分布式锁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub backend: BackendKind,
    pub key_prefix: String,
    /// 租约时长，也是单次触发允许的最长执行时间
    pub lease_seconds: u64,
    /// 获取锁的最长等待
    pub wait_millis: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            key_prefix: "task_lock:".to_string(),
            lease_seconds: 300,
            wait_millis: 1000,
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key_prefix.is_empty() {
            return Err(anyhow::anyhow!("锁键前缀不能为空"));
        }

        if self.lease_seconds == 0 {
            return Err(anyhow::anyhow!("锁租约时长必须大于0"));
        }

        if self.wait_millis > self.lease_seconds * 1000 {
            return Err(anyhow::anyhow!("锁等待时间不能超过租约时长"));
        }

        Ok(())
    }
}

/// 扇出队列和重试队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: BackendKind,
    pub fanout_queue: String,
    pub retry_queue: String,
    pub consumer_group: String,
    pub batch_size: usize,
    pub poll_interval_millis: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            fanout_queue: "message:push:queue".to_string(),
            retry_queue: "message:retry:queue".to_string(),
            consumer_group: "reminder_fanout".to_string(),
            batch_size: 10,
            poll_interval_millis: 1000,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fanout_queue.is_empty() {
            return Err(anyhow::anyhow!("扇出队列名称不能为空"));
        }

        if self.retry_queue.is_empty() {
            return Err(anyhow::anyhow!("重试队列名称不能为空"));
        }

        if self.fanout_queue == self.retry_queue {
            return Err(anyhow::anyhow!("扇出队列和重试队列不能同名"));
        }

        if self.consumer_group.is_empty() {
            return Err(anyhow::anyhow!("消费者组名称不能为空"));
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批量大小必须大于0"));
        }

        if self.poll_interval_millis == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        Ok(())
    }
}
