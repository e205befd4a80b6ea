pub mod mapping;
pub mod memory;
pub mod sqlite;

pub use memory::{
    InMemoryDeliveryAttemptRepository, InMemoryDestinationRepository,
    InMemoryExecutionLogRepository, InMemoryMessageRepository, InMemoryTagRouteRepository,
    InMemoryTaskRepository, InMemoryUserRepository, MemoryStore,
};
pub use sqlite::{DatabaseManager, DbPool};

use reminder_core::traits::{
    DeliveryAttemptRepository, DestinationRepository, ExecutionLogRepository, MessageRepository,
    TagRouteRepository, TaskRepository, UserRepository,
};
use std::sync::Arc;

/// 一组仓储实例，由存储后端统一创建后注入各服务
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub execution_logs: Arc<dyn ExecutionLogRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub delivery_attempts: Arc<dyn DeliveryAttemptRepository>,
    pub destinations: Arc<dyn DestinationRepository>,
    pub tag_routes: Arc<dyn TagRouteRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Repositories {
    /// 共享同一份内存存储的仓储
    pub fn in_memory() -> Self {
        let store = MemoryStore::new();
        Self {
            tasks: Arc::new(InMemoryTaskRepository::new(store.clone())),
            execution_logs: Arc::new(InMemoryExecutionLogRepository::new(store.clone())),
            messages: Arc::new(InMemoryMessageRepository::new(store.clone())),
            delivery_attempts: Arc::new(InMemoryDeliveryAttemptRepository::new(store.clone())),
            destinations: Arc::new(InMemoryDestinationRepository::new(store.clone())),
            tag_routes: Arc::new(InMemoryTagRouteRepository::new(store.clone())),
            users: Arc::new(InMemoryUserRepository::new(store)),
        }
    }
}
