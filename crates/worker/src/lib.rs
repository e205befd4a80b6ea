//! 消息受理与扇出投递
//!
//! 受理侧把外部调用解析成推送请求并落库入队；消费侧从扇出队列取任务，
//! 按标签路由选出目标，经各平台发送器投递，失败的投递进入延迟重试队列。

pub mod consumer;
pub mod dispatcher;
pub mod fanout;
pub mod intake;
pub mod retry_worker;
pub mod router;
pub mod senders;

pub use consumer::FanoutConsumer;
pub use dispatcher::MessageDispatcher;
pub use fanout::{FanoutProcessor, FanoutReport, FanoutSettings};
pub use intake::{PushInput, PushQuery};
pub use retry_worker::{RetryDisposition, RetryRound, RetryWorker};
pub use router::FanoutRouter;
pub use senders::SenderRegistry;
