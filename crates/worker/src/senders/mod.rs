//! 各推送平台的发送器
//!
//! 发送器在启动时按平台注册到 [`SenderRegistry`]，投递时按目标的平台代码查找。
//! 所有发送器共享同一个带连接/读取超时的HTTP客户端。

pub mod bark;
pub mod email;
pub mod masking;
pub mod pushme;
pub mod webhook;
pub mod wxpusher;

pub use bark::BarkSender;
pub use email::EmailSender;
pub use pushme::PushMeSender;
pub use webhook::WebhookSender;
pub use wxpusher::WxPusherSender;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reminder_core::{
    config::SendersConfig,
    models::{Destination, MessageRecord, PlatformKind, SendOutcome},
    traits::PlatformSender,
    ReminderError, ReminderResult,
};
use tracing::{info, warn};

/// 创建发送器共用的HTTP客户端
pub fn build_http_client(config: &SendersConfig) -> ReminderResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .timeout(Duration::from_secs(
            config.connect_timeout_seconds + config.read_timeout_seconds,
        ))
        .build()
        .map_err(|e| ReminderError::Configuration(format!("创建HTTP客户端失败: {e}")))
}

/// 消息正文里的转发时间
pub(crate) fn forwarded_at() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 发出请求并读取响应，传输层异常转换为错误描述
pub(crate) async fn execute(request: reqwest::RequestBuilder) -> Result<HttpReply, String> {
    let response = request
        .send()
        .await
        .map_err(|e| format!("HTTP请求失败: {e}"))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("读取响应体失败: {e}"));
    Ok(HttpReply { status, body })
}

/// 只看状态码的平台：2xx为成功
pub(crate) fn status_outcome(request_data: String, reply: Result<HttpReply, String>) -> SendOutcome {
    match reply {
        Ok(reply) if reply.is_success() => SendOutcome::success(request_data, reply.body),
        Ok(reply) => SendOutcome::failure(format!("HTTP错误: {}", reply.status))
            .with_request(request_data)
            .with_response(reply.body),
        Err(e) => SendOutcome::failure(e).with_request(request_data),
    }
}

/// 平台到发送器的注册表
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<PlatformKind, Arc<dyn PlatformSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置注册全部内置平台
    pub fn from_config(config: &SendersConfig) -> ReminderResult<Self> {
        let client = build_http_client(config)?;
        let mut registry = Self::new();
        registry.register(Arc::new(BarkSender::new(
            client.clone(),
            &config.bark_server_url,
        )));
        registry.register(Arc::new(WxPusherSender::new(
            client.clone(),
            &config.wxpusher_api_url,
        )));
        registry.register(Arc::new(PushMeSender::new(
            client.clone(),
            &config.pushme_api_url,
        )));
        registry.register(Arc::new(WebhookSender::new(client)));
        registry.register(Arc::new(EmailSender::from_config(
            config.smtp.as_ref(),
            Duration::from_secs(config.read_timeout_seconds),
        )?));

        info!("推送平台注册完成: {:?}", registry.platforms());
        Ok(registry)
    }

    /// 同一平台重复注册时后者覆盖前者
    pub fn register(&mut self, sender: Arc<dyn PlatformSender>) {
        self.senders.insert(sender.platform(), sender);
    }

    pub fn get(&self, platform: PlatformKind) -> Option<Arc<dyn PlatformSender>> {
        self.senders.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<PlatformKind> {
        let mut platforms: Vec<_> = self.senders.keys().copied().collect();
        platforms.sort();
        platforms
    }

    fn resolve(&self, destination: &Destination) -> Result<Arc<dyn PlatformSender>, String> {
        let unsupported = || format!("不支持的推送平台: {}", destination.platform);
        let kind = destination.platform_kind().map_err(|_| unsupported())?;
        self.get(kind).ok_or_else(unsupported)
    }

    /// 按目标平台发送，未知平台记为失败
    pub async fn send(&self, message: &MessageRecord, destination: &Destination) -> SendOutcome {
        match self.resolve(destination) {
            Ok(sender) => sender.send(message, destination).await,
            Err(e) => {
                warn!(
                    "推送目标平台不可用: destination_id={}, platform={}",
                    destination.id, destination.platform
                );
                SendOutcome::failure(e)
            }
        }
    }

    pub async fn test(&self, destination: &Destination) -> bool {
        match self.resolve(destination) {
            Ok(sender) => sender.test(destination).await,
            Err(_) => false,
        }
    }
}
