use async_trait::async_trait;

use crate::{
    models::{Destination, MessageRecord, PlatformKind, PushRequest, SendOutcome},
    ReminderResult,
};

/// 推送平台发送器
///
/// 各平台只在地址构造和负载格式上不同。所有传输异常和非成功响应
/// 都要转换为失败结果，不能越过这个边界抛出。
#[async_trait]
pub trait PlatformSender: Send + Sync {
    fn platform(&self) -> PlatformKind;

    async fn send(&self, message: &MessageRecord, destination: &Destination) -> SendOutcome;

    /// 发送一条测试消息，返回配置是否可用
    async fn test(&self, destination: &Destination) -> bool;
}

/// 消息受理入口
///
/// 任务执行器只依赖这个接口，不关心消息如何入队。
#[async_trait]
pub trait MessageIntake: Send + Sync {
    /// 校验、持久化并入队，返回消息ID；投递是异步的
    async fn submit(&self, request: PushRequest) -> ReminderResult<i64>;
}
