use redis::aio::ConnectionManager;
use redis::Client;
use reminder_core::{config::RedisConfig, ReminderError, ReminderResult};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

/// 共享的Redis异步连接
///
/// `ConnectionManager` 内部自动重连，克隆开销很小，锁和队列实现共用同一个实例。
#[derive(Clone)]
pub struct RedisConnectionManager {
    manager: ConnectionManager,
    config: RedisConfig,
}

impl RedisConnectionManager {
    pub async fn new(config: RedisConfig) -> ReminderResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            ReminderError::Configuration(format!("创建Redis客户端失败: {e}"))
        })?;

        let manager = Self::connect_with_retry(&client, &config).await?;
        let this = Self { manager, config };
        this.ping().await?;
        debug!("Successfully connected to Redis at {}", this.config.url);

        Ok(this)
    }

    async fn connect_with_retry(
        client: &Client,
        config: &RedisConfig,
    ) -> ReminderResult<ConnectionManager> {
        let connect_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut last_error = String::from("Unknown");

        for attempt in 0..config.max_retry_attempts {
            match timeout(connect_timeout, client.get_connection_manager()).await {
                Ok(Ok(manager)) => {
                    if attempt > 0 {
                        debug!("Successfully reconnected to Redis after {} attempts", attempt + 1);
                    }
                    return Ok(manager);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("连接超时({}s)", config.connection_timeout_seconds),
            }

            if attempt + 1 < config.max_retry_attempts {
                warn!(
                    "Failed to connect to Redis (attempt {}/{}): {}. Retrying in {}s...",
                    attempt + 1,
                    config.max_retry_attempts,
                    last_error,
                    config.retry_delay_seconds
                );
                sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }

        let error_msg = format!(
            "Failed to connect to Redis after {} attempts. Last error: {}",
            config.max_retry_attempts, last_error
        );
        error!("{}", error_msg);
        Err(ReminderError::Network(error_msg))
    }

    /// 获取一个连接句柄
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn execute_command<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> ReminderResult<T> {
        let mut conn = self.connection();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| ReminderError::Network(format!("Redis command failed: {e}")))
    }

    pub async fn ping(&self) -> ReminderResult<()> {
        let response: String = self.execute_command(&redis::cmd("PING")).await?;
        if response == "PONG" {
            Ok(())
        } else {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            Err(ReminderError::Network(error_msg))
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}
