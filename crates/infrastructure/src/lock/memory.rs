use async_trait::async_trait;
use rand::Rng;
use reminder_core::{
    traits::{DistributedLock, LockAttempt, LockHolder, LockLease},
    ReminderResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::ACQUIRE_POLL_INTERVAL;

#[derive(Debug, Clone)]
struct LockEntry {
    holder: LockHolder,
    expires_at: Instant,
}

/// 进程内锁
///
/// 单节点部署和测试使用。多个调度器共享同一个实例时语义与Redis实现一致。
#[derive(Debug, Clone, Default)]
pub struct InMemoryLock {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_once(
        &self,
        key: &str,
        holder: &LockHolder,
        lease: Duration,
    ) -> Result<(), Option<LockHolder>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Err(Some(entry.holder.clone())),
            _ => {
                entries.insert(
                    key.to_string(),
                    LockEntry {
                        holder: holder.clone(),
                        expires_at: now + lease,
                    },
                );
                Ok(())
            }
        }
    }

    async fn live_entry(&self, key: &str) -> Option<LockEntry> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(
        &self,
        key: &str,
        node_id: &str,
        lease: Duration,
        wait: Duration,
    ) -> ReminderResult<LockAttempt> {
        let holder = LockHolder::new(node_id);
        let deadline = Instant::now() + wait;

        loop {
            match self.try_once(key, &holder, lease).await {
                Ok(()) => {
                    debug!("获取锁成功: key={}, node={}", key, node_id);
                    return Ok(LockAttempt::Granted(LockLease {
                        key: key.to_string(),
                        holder,
                        lease,
                    }));
                }
                Err(current) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(LockAttempt::Denied { holder: current });
                    }
                    let jitter = Duration::from_millis(rand::rng().random_range(0..20));
                    let pause = (ACQUIRE_POLL_INTERVAL + jitter).min(deadline - now);
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    async fn release(&self, lease: &LockLease) -> ReminderResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(&lease.key) {
            Some(entry) if entry.holder.token == lease.holder.token => {
                entries.remove(&lease.key);
                debug!("释放锁: key={}", lease.key);
                Ok(true)
            }
            _ => {
                debug!("锁已不属于当前持有者，忽略释放: key={}", lease.key);
                Ok(false)
            }
        }
    }

    async fn is_held(&self, key: &str) -> ReminderResult<bool> {
        Ok(self.live_entry(key).await.is_some())
    }

    async fn remaining_lease(&self, key: &str) -> ReminderResult<Option<Duration>> {
        Ok(self
            .live_entry(key)
            .await
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn holder(&self, key: &str) -> ReminderResult<Option<LockHolder>> {
        Ok(self.live_entry(key).await.map(|entry| entry.holder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_exactly_one_concurrent_acquirer() {
        let lock = InMemoryLock::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move {
                lock.try_acquire(
                    "task_lock:42:202401010900",
                    &format!("node-{i}"),
                    LEASE,
                    Duration::from_millis(100),
                )
                .await
                .unwrap()
            }));
        }

        let mut granted = 0;
        let mut denied_with_holder = 0;
        for handle in handles {
            match handle.await.unwrap() {
                LockAttempt::Granted(_) => granted += 1,
                LockAttempt::Denied { holder } => {
                    if holder.is_some() {
                        denied_with_holder += 1;
                    }
                }
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(denied_with_holder, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_within_wait_bound() {
        let lock = InMemoryLock::new();
        let first = lock
            .try_acquire("k", "node-a", LEASE, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(first.is_granted());

        let started = Instant::now();
        let second = lock
            .try_acquire("k", "node-b", LEASE, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!second.is_granted());
        assert!(started.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_release_only_by_holder() {
        let lock = InMemoryLock::new();
        let LockAttempt::Granted(lease) = lock
            .try_acquire("k", "node-a", LEASE, Duration::ZERO)
            .await
            .unwrap()
        else {
            panic!("expected grant");
        };

        let stranger = LockLease {
            holder: LockHolder::new("node-b"),
            ..lease.clone()
        };
        assert!(!lock.release(&stranger).await.unwrap());
        assert!(lock.is_held("k").await.unwrap());
        assert_eq!(lock.holder("k").await.unwrap().unwrap().node_id, "node-a");

        assert!(lock.release(&lease).await.unwrap());
        assert!(!lock.is_held("k").await.unwrap());
        // 重复释放是安全的
        assert!(!lock.release(&lease).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires() {
        let lock = InMemoryLock::new();
        let attempt = lock
            .try_acquire("k", "node-a", Duration::from_secs(5), Duration::ZERO)
            .await
            .unwrap();
        assert!(attempt.is_granted());

        let remaining = lock.remaining_lease("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!lock.is_held("k").await.unwrap());
        assert_eq!(lock.remaining_lease("k").await.unwrap(), None);

        let again = lock
            .try_acquire("k", "node-b", Duration::from_secs(5), Duration::ZERO)
            .await
            .unwrap();
        assert!(again.is_granted());
    }
}
