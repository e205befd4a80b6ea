use serde::{Deserialize, Serialize};

use crate::models::{parse_timezone, DEFAULT_TIMEZONE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 节点标识，为空时取 `主机名-随机后缀`
    pub node_id: Option<String>,
    pub default_timezone: String,
    pub monitor_interval_seconds: u64,
    pub timer_warn_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_id: None,
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            monitor_interval_seconds: 300,
            timer_warn_threshold: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        parse_timezone(&self.default_timezone)
            .map_err(|e| anyhow::anyhow!("默认时区无效: {e}"))?;

        if self.monitor_interval_seconds == 0 {
            return Err(anyhow::anyhow!("监控间隔必须大于0"));
        }

        if let Some(node_id) = &self.node_id {
            if node_id.trim().is_empty() {
                return Err(anyhow::anyhow!("节点ID不能为空字符串"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub enabled: bool,
    /// 并行消费者数量
    pub consumers: usize,
    /// 单条消息内并行发送的目标数
    pub max_parallel_sends: usize,
    pub retry_delay_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_poll_interval_seconds: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consumers: 1,
            max_parallel_sends: 4,
            retry_delay_seconds: 300,
            max_retry_attempts: 3,
            retry_poll_interval_seconds: 30,
        }
    }
}

impl FanoutConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.consumers == 0 {
            return Err(anyhow::anyhow!("扇出消费者数量必须大于0"));
        }

        if self.max_parallel_sends == 0 {
            return Err(anyhow::anyhow!("并行发送数必须大于0"));
        }

        if self.retry_delay_seconds == 0 {
            return Err(anyhow::anyhow!("重试延迟必须大于0"));
        }

        if self.retry_poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("重试轮询间隔必须大于0"));
        }

        Ok(())
    }
}
