//! 内存仓储实现
//!
//! 用于 `memory://` 部署和测试。所有仓储共享一份 [`MemoryStore`]，
//! 每个操作在一把锁内完成，计数递增天然原子。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reminder_core::{
    models::{
        DeliveryAttempt, DeliveryStatus, Destination, ExecutionLogEntry, MessageRecord,
        MessageStatus, ScheduledTask, TagRoute, TaskFilter, TaskStatus, User,
    },
    traits::{
        DeliveryAttemptRepository, DestinationRepository, ExecutionLogRepository,
        MessageRepository, TagRouteRepository, TaskRepository, UserRepository,
    },
    ReminderError, ReminderResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreInner {
    tasks: BTreeMap<i64, ScheduledTask>,
    execution_logs: Vec<ExecutionLogEntry>,
    messages: BTreeMap<i64, MessageRecord>,
    delivery_attempts: Vec<DeliveryAttempt>,
    destinations: BTreeMap<i64, Destination>,
    tag_routes: BTreeMap<i64, TagRoute>,
    users: BTreeMap<i64, User>,
}

/// 内存仓储共享的存储
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct InMemoryTaskRepository {
    store: MemoryStore,
}

impl InMemoryTaskRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &ScheduledTask) -> ReminderResult<()> {
        let mut inner = self.store.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(ReminderError::validation(format!("任务ID已存在: {}", task.id)));
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<ScheduledTask>> {
        Ok(self.store.inner.read().await.tasks.get(&id).cloned())
    }

    async fn update(&self, task: &ScheduledTask) -> ReminderResult<()> {
        let mut inner = self.store.inner.write().await;
        let existing = inner
            .tasks
            .get_mut(&task.id)
            .ok_or(ReminderError::TaskNotFound { id: task.id })?;
        let executed_count = existing.executed_count;
        *existing = task.clone();
        existing.executed_count = executed_count;
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner_id: i64,
        filter: &TaskFilter,
    ) -> ReminderResult<Vec<ScheduledTask>> {
        let inner = self.store.inner.read().await;
        let mut tasks: Vec<ScheduledTask> = inner
            .tasks
            .values()
            .filter(|t| t.owner_id == owner_id && filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn count_by_owner(&self, owner_id: i64, filter: &TaskFilter) -> ReminderResult<i64> {
        let inner = self.store.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.owner_id == owner_id && filter.matches(t))
            .count() as i64)
    }

    async fn list_enabled(&self) -> ReminderResult<Vec<ScheduledTask>> {
        let inner = self.store.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Enabled && t.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn increment_executed_count(&self, id: i64) -> ReminderResult<i32> {
        let mut inner = self.store.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(ReminderError::TaskNotFound { id })?;
        task.executed_count += 1;
        task.updated_at = Utc::now();
        Ok(task.executed_count)
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> ReminderResult<()> {
        let mut inner = self.store.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(ReminderError::TaskNotFound { id })?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> ReminderResult<()> {
        let mut inner = self.store.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(ReminderError::TaskNotFound { id })?;
        task.status = TaskStatus::Deleted;
        task.deleted_at = Some(at);
        task.updated_at = at;
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryExecutionLogRepository {
    store: MemoryStore,
}

impl InMemoryExecutionLogRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExecutionLogRepository for InMemoryExecutionLogRepository {
    async fn append(&self, entry: &ExecutionLogEntry) -> ReminderResult<i64> {
        let mut inner = self.store.inner.write().await;
        let id = inner.execution_logs.len() as i64 + 1;
        let mut stored = entry.clone();
        stored.id = id;
        inner.execution_logs.push(stored);
        Ok(id)
    }

    async fn list_by_task(
        &self,
        task_id: i64,
        offset: i64,
        limit: i64,
    ) -> ReminderResult<Vec<ExecutionLogEntry>> {
        let inner = self.store.inner.read().await;
        Ok(inner
            .execution_logs
            .iter()
            .rev()
            .filter(|e| e.task_id == task_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_by_task(&self, task_id: i64) -> ReminderResult<i64> {
        let inner = self.store.inner.read().await;
        Ok(inner
            .execution_logs
            .iter()
            .filter(|e| e.task_id == task_id)
            .count() as i64)
    }
}

#[derive(Clone)]
pub struct InMemoryMessageRepository {
    store: MemoryStore,
}

impl InMemoryMessageRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, message: &MessageRecord) -> ReminderResult<()> {
        let mut inner = self.store.inner.write().await;
        inner.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<MessageRecord>> {
        Ok(self.store.inner.read().await.messages.get(&id).cloned())
    }

    async fn update_status(&self, id: i64, status: MessageStatus) -> ReminderResult<()> {
        let mut inner = self.store.inner.write().await;
        let message = inner
            .messages
            .get_mut(&id)
            .ok_or(ReminderError::MessageNotFound { id })?;
        message.status = status;
        Ok(())
    }

    async fn record_delivery(&self, id: i64, platform: &str, success: bool) -> ReminderResult<()> {
        let mut inner = self.store.inner.write().await;
        let message = inner
            .messages
            .get_mut(&id)
            .ok_or(ReminderError::MessageNotFound { id })?;
        if success {
            message.push_success_count += 1;
            message.pushed_platforms.insert(platform.to_string());
        } else {
            message.push_fail_count += 1;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryDeliveryAttemptRepository {
    store: MemoryStore,
}

impl InMemoryDeliveryAttemptRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeliveryAttemptRepository for InMemoryDeliveryAttemptRepository {
    async fn append(&self, attempt: &DeliveryAttempt) -> ReminderResult<()> {
        self.store.inner.write().await.delivery_attempts.push(attempt.clone());
        Ok(())
    }

    async fn has_success(&self, message_id: i64, destination_id: i64) -> ReminderResult<bool> {
        let inner = self.store.inner.read().await;
        Ok(inner.delivery_attempts.iter().any(|a| {
            a.message_id == message_id
                && a.destination_id == destination_id
                && a.status == DeliveryStatus::Success
        }))
    }

    async fn has_first_attempt(&self, message_id: i64, destination_id: i64) -> ReminderResult<bool> {
        let inner = self.store.inner.read().await;
        Ok(inner.delivery_attempts.iter().any(|a| {
            a.message_id == message_id && a.destination_id == destination_id && a.retry_count == 0
        }))
    }

    async fn list_by_message(&self, message_id: i64) -> ReminderResult<Vec<DeliveryAttempt>> {
        let inner = self.store.inner.read().await;
        Ok(inner
            .delivery_attempts
            .iter()
            .filter(|a| a.message_id == message_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct InMemoryDestinationRepository {
    store: MemoryStore,
}

impl InMemoryDestinationRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DestinationRepository for InMemoryDestinationRepository {
    async fn list_enabled_by_owner(&self, owner_id: i64) -> ReminderResult<Vec<Destination>> {
        let inner = self.store.inner.read().await;
        let mut destinations: Vec<Destination> = inner
            .destinations
            .values()
            .filter(|d| d.owner_id == owner_id && d.enabled)
            .cloned()
            .collect();
        destinations.sort_by_key(|d| (d.sort_order, d.id));
        Ok(destinations)
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<Destination>> {
        Ok(self.store.inner.read().await.destinations.get(&id).cloned())
    }

    async fn save(&self, destination: &Destination) -> ReminderResult<()> {
        self.store
            .inner
            .write()
            .await
            .destinations
            .insert(destination.id, destination.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryTagRouteRepository {
    store: MemoryStore,
}

impl InMemoryTagRouteRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TagRouteRepository for InMemoryTagRouteRepository {
    async fn list_enabled_by_owner(&self, owner_id: i64) -> ReminderResult<Vec<TagRoute>> {
        let inner = self.store.inner.read().await;
        Ok(inner
            .tag_routes
            .values()
            .filter(|r| r.owner_id == owner_id && r.enabled)
            .cloned()
            .collect())
    }

    async fn save(&self, route: &TagRoute) -> ReminderResult<()> {
        self.store
            .inner
            .write()
            .await
            .tag_routes
            .insert(route.id, route.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryUserRepository {
    store: MemoryStore,
}

impl InMemoryUserRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_user_key(&self, user_key: &str) -> ReminderResult<Option<User>> {
        let inner = self.store.inner.read().await;
        Ok(inner.users.values().find(|u| u.user_key == user_key).cloned())
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<User>> {
        Ok(self.store.inner.read().await.users.get(&id).cloned())
    }

    async fn save(&self, user: &User) -> ReminderResult<()> {
        self.store.inner.write().await.users.insert(user.id, user.clone());
        Ok(())
    }
}
