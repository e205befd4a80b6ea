use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    coordination::{BackendKind, LockConfig, QueueConfig, RedisConfig},
    database::DatabaseConfig,
    scheduler_fanout::{FanoutConfig, SchedulerConfig},
    senders::{LoggingConfig, SendersConfig},
};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/reminder.toml",
    "reminder.toml",
    "/etc/reminder/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub lock: LockConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub fanout: FanoutConfig,
    pub senders: SendersConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: REMINDER_, nested separator: __)
    ///
    /// An explicit `config_path` must exist; otherwise the default paths are tried
    /// and a missing file simply leaves the defaults in place.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("REMINDER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;

        if self.uses_redis() {
            self.redis.validate().context("Redis配置验证失败")?;
        }

        self.lock.validate().context("分布式锁配置验证失败")?;
        self.queue.validate().context("队列配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.fanout.validate().context("扇出配置验证失败")?;
        self.senders.validate().context("推送通道配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        Ok(())
    }

    pub fn uses_redis(&self) -> bool {
        self.lock.backend == BackendKind::Redis || self.queue.backend == BackendKind::Redis
    }

    /// 解析本节点标识
    pub fn resolve_node_id(&self) -> String {
        match &self.scheduler.node_id {
            Some(id) => id.trim().to_string(),
            None => generate_node_id(),
        }
    }
}

/// `主机名-8位随机后缀`，同一主机上多个进程也不会重复
pub fn generate_node_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "reminder".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock.key_prefix, "task_lock:");
        assert_eq!(config.lock.lease_seconds, 300);
        assert_eq!(config.lock.wait_millis, 1000);
        assert_eq!(config.fanout.retry_delay_seconds, 300);
        assert_eq!(config.scheduler.default_timezone, "Asia/Shanghai");
        assert!(!config.uses_redis());
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let toml_str = r#"
[database]
url = "memory://"

[lock]
backend = "redis"
lease_seconds = 120

[senders.smtp]
host = "smtp.example.com"
username = "bot"
password = "secret"
from = "bot@example.com"
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert!(config.database.is_memory());
        assert_eq!(config.lock.backend, BackendKind::Redis);
        assert_eq!(config.lock.lease_seconds, 120);
        assert_eq!(config.lock.wait_millis, 1000);
        assert!(config.uses_redis());

        let smtp = config.senders.smtp.as_ref().unwrap();
        assert_eq!(smtp.port, 587);
        assert!(smtp.starttls);

        let round_trip = AppConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(round_trip.lock.lease_seconds, 120);
    }

    #[test]
    fn test_invalid_sections_rejected() {
        assert!(AppConfig::from_toml("[database]\nurl = \"postgres://x\"").is_err());
        assert!(AppConfig::from_toml("[scheduler]\ndefault_timezone = \"Nowhere/City\"").is_err());
        assert!(AppConfig::from_toml("[queue]\nretry_queue = \"message:push:queue\"").is_err());
        assert!(AppConfig::from_toml("[logging]\nformat = \"xml\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[fanout]\nmax_parallel_sends = 8").unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.fanout.max_parallel_sends, 8);

        assert!(AppConfig::load(Some("/nonexistent/reminder.toml")).is_err());
    }

    #[test]
    fn test_node_id_resolution() {
        let mut config = AppConfig::default();
        let generated = config.resolve_node_id();
        assert!(generated.len() > 9);
        assert_ne!(generated, config.resolve_node_id());

        config.scheduler.node_id = Some("node-a".to_string());
        assert_eq!(config.resolve_node_id(), "node-a");
    }
}
