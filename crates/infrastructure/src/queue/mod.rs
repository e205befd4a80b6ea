pub mod in_memory;
pub mod redis_stream;
pub mod retry;

pub use in_memory::InMemoryMessageQueue;
pub use redis_stream::RedisStreamMessageQueue;
pub use retry::{InMemoryRetryQueue, RedisRetryQueue};
