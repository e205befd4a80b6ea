use async_trait::async_trait;
use rand::Rng;
use reminder_core::{
    traits::{DistributedLock, LockAttempt, LockHolder, LockLease},
    ReminderError, ReminderResult,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::ACQUIRE_POLL_INTERVAL;
use crate::redis_connection::RedisConnectionManager;

/// 令牌匹配才删除
const RELEASE_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return 0
end
local ok, holder = pcall(cjson.decode, value)
if ok and holder['token'] == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// 基于 `SET NX PX` 的分布式锁
///
/// 锁的值是 [`LockHolder`] 的JSON，被拒绝的一方可以读出当前持有者。
pub struct RedisLock {
    connection: RedisConnectionManager,
}

impl RedisLock {
    pub fn new(connection: RedisConnectionManager) -> Self {
        Self { connection }
    }

    async fn set_nx(&self, key: &str, value: &str, lease: Duration) -> ReminderResult<bool> {
        let result: Option<String> = self
            .connection
            .execute_command(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(lease.as_millis().max(1) as u64),
            )
            .await
            .map_err(|e| ReminderError::Lock(e.to_string()))?;
        Ok(result.is_some())
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(
        &self,
        key: &str,
        node_id: &str,
        lease: Duration,
        wait: Duration,
    ) -> ReminderResult<LockAttempt> {
        let holder = LockHolder::new(node_id);
        let value = serde_json::to_string(&holder)?;
        let deadline = Instant::now() + wait;

        loop {
            if self.set_nx(key, &value, lease).await? {
                debug!("获取锁成功: key={}, node={}", key, node_id);
                return Ok(LockAttempt::Granted(LockLease {
                    key: key.to_string(),
                    holder,
                    lease,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                let current = self.holder(key).await.unwrap_or_else(|e| {
                    warn!("读取锁持有者失败: key={}, error={}", key, e);
                    None
                });
                return Ok(LockAttempt::Denied { holder: current });
            }

            let jitter = Duration::from_millis(rand::rng().random_range(0..20));
            tokio::time::sleep((ACQUIRE_POLL_INTERVAL + jitter).min(deadline - now)).await;
        }
    }

    async fn release(&self, lease: &LockLease) -> ReminderResult<bool> {
        let mut conn = self.connection.connection();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&lease.key)
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ReminderError::Lock(format!("释放锁失败: {e}")))?;

        if deleted == 0 {
            debug!("锁已不属于当前持有者，忽略释放: key={}", lease.key);
        }
        Ok(deleted > 0)
    }

    async fn is_held(&self, key: &str) -> ReminderResult<bool> {
        let exists: i64 = self
            .connection
            .execute_command(redis::cmd("EXISTS").arg(key))
            .await
            .map_err(|e| ReminderError::Lock(e.to_string()))?;
        Ok(exists > 0)
    }

    async fn remaining_lease(&self, key: &str) -> ReminderResult<Option<Duration>> {
        let pttl: i64 = self
            .connection
            .execute_command(redis::cmd("PTTL").arg(key))
            .await
            .map_err(|e| ReminderError::Lock(e.to_string()))?;
        // -2 不存在，-1 没有过期时间
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn holder(&self, key: &str) -> ReminderResult<Option<LockHolder>> {
        let value: Option<String> = self
            .connection
            .execute_command(redis::cmd("GET").arg(key))
            .await
            .map_err(|e| ReminderError::Lock(e.to_string()))?;
        Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
    }
}
