//! 基于真实Redis容器的锁与重试队列测试
//!
//! 需要本机可用的Docker，默认忽略：`cargo test -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use reminder_core::config::RedisConfig;
use reminder_core::models::RetryJob;
use reminder_core::traits::{DistributedLock, LockAttempt, LockHolder, LockLease, RetryQueue};
use reminder_infrastructure::{RedisConnectionManager, RedisLock, RedisRetryQueue};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

struct RedisTestSetup {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    connection: RedisConnectionManager,
}

impl RedisTestSetup {
    async fn new() -> Result<Self> {
        let container = Redis::default().with_tag("7-alpine").start().await?;
        let port = container.get_host_port_ipv4(6379).await?;
        let config = RedisConfig {
            url: format!("redis://localhost:{port}"),
            ..Default::default()
        };
        let connection = RedisConnectionManager::new(config).await?;
        Ok(Self {
            container,
            connection,
        })
    }
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_concurrent_acquire_grants_exactly_one() -> Result<()> {
    let setup = RedisTestSetup::new().await?;
    let lock = Arc::new(RedisLock::new(setup.connection.clone()));
    let key = "task_lock:1:202401010900";

    let mut handles = Vec::new();
    for i in 0..10 {
        let lock = lock.clone();
        handles.push(tokio::spawn(async move {
            lock.try_acquire(
                key,
                &format!("node-{i}"),
                Duration::from_secs(30),
                Duration::from_millis(100),
            )
            .await
        }));
    }

    let mut granted = Vec::new();
    let mut denied = 0;
    for handle in handles {
        match handle.await?? {
            LockAttempt::Granted(lease) => granted.push(lease),
            LockAttempt::Denied { holder } => {
                assert!(holder.is_some());
                denied += 1;
            }
        }
    }
    assert_eq!(granted.len(), 1);
    assert_eq!(denied, 9);

    let holder = lock.holder(key).await?.expect("锁应当有持有者");
    assert_eq!(holder.node_id, granted[0].holder.node_id);
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_release_with_wrong_token_keeps_lock() -> Result<()> {
    let setup = RedisTestSetup::new().await?;
    let lock = RedisLock::new(setup.connection.clone());
    let key = "task_lock:2:202401010900";

    let LockAttempt::Granted(lease) = lock
        .try_acquire(key, "node-a", Duration::from_secs(30), Duration::ZERO)
        .await?
    else {
        panic!("空锁应当获取成功");
    };

    let stranger = LockLease {
        key: key.to_string(),
        holder: LockHolder::new("node-a"),
        lease: lease.lease,
    };
    assert!(!lock.release(&stranger).await?);
    assert!(lock.is_held(key).await?);

    assert!(lock.release(&lease).await?);
    assert!(!lock.is_held(key).await?);
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_lease_expiry_frees_lock() -> Result<()> {
    let setup = RedisTestSetup::new().await?;
    let lock = RedisLock::new(setup.connection.clone());
    let key = "task_lock:3:202401010900";

    let first = lock
        .try_acquire(key, "node-a", Duration::from_millis(300), Duration::ZERO)
        .await?;
    assert!(first.is_granted());

    tokio::time::sleep(Duration::from_millis(600)).await;
    let second = lock
        .try_acquire(key, "node-b", Duration::from_secs(30), Duration::ZERO)
        .await?;
    assert!(second.is_granted());
    Ok(())
}

#[tokio::test]
#[ignore] // 需要Docker
async fn test_concurrent_take_due_hands_out_each_job_once() -> Result<()> {
    let setup = RedisTestSetup::new().await?;
    let queue = Arc::new(RedisRetryQueue::new(setup.connection.clone(), "reminder:retry"));
    let now = Utc::now();

    for destination_id in 0..100 {
        queue
            .enqueue(&RetryJob::new(
                1,
                destination_id,
                "bark",
                now,
                ChronoDuration::seconds(-1),
            ))
            .await?;
    }
    queue
        .enqueue(&RetryJob::new(1, 999, "bark", now, ChronoDuration::minutes(5)))
        .await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            loop {
                let batch = queue.take_due(now, 7).await?;
                if batch.is_empty() {
                    break;
                }
                taken.extend(batch);
            }
            Ok::<_, reminder_core::ReminderError>(taken)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.extend(handle.await??.into_iter().map(|job| job.destination_id));
    }
    ids.sort_unstable();
    let total = ids.len();
    ids.dedup();
    assert_eq!(total, 100);
    assert_eq!(ids.len(), 100);
    assert!(!ids.contains(&999));
    assert_eq!(queue.len().await?, 1);
    Ok(())
}
