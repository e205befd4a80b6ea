use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use reminder_core::{
    models::{Destination, MessageRecord, PlatformKind, SendOutcome},
    traits::PlatformSender,
};

use super::{execute, status_outcome};

/// PushMe发送器，目标参数：`pushKey`（必填）、`template`
pub struct PushMeSender {
    client: reqwest::Client,
    api_url: String,
}

impl PushMeSender {
    pub fn new(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
        }
    }

    fn endpoint(&self, destination: &Destination) -> Result<Url, String> {
        let key = destination
            .param("pushKey")
            .ok_or_else(|| "PushMe推送Key未配置".to_string())?;
        Url::parse_with_params(&self.api_url, &[("push_key", key)])
            .map_err(|e| format!("PushMe接口地址无效: {e}"))
    }

    pub fn build_payload(title: &str, content: &str, url: Option<&str>, template: Option<&str>) -> Value {
        let mut payload = json!({ "title": title, "content": content });
        if let Some(url) = url {
            payload["url"] = json!(url);
        }
        if let Some(template) = template {
            payload["template"] = json!(template);
        }
        payload
    }

    async fn post(&self, destination: &Destination, payload: Value) -> SendOutcome {
        let endpoint = match self.endpoint(destination) {
            Ok(url) => url,
            Err(e) => return SendOutcome::failure(e),
        };
        let request_data = payload.to_string();
        let outcome = status_outcome(
            request_data,
            execute(self.client.post(endpoint).json(&payload)).await,
        );
        if let Some(error) = &outcome.error {
            warn!("PushMe推送失败: destination_id={}, error={}", destination.id, error);
        }
        outcome
    }
}

#[async_trait]
impl PlatformSender for PushMeSender {
    fn platform(&self) -> PlatformKind {
        PlatformKind::PushMe
    }

    async fn send(&self, message: &MessageRecord, destination: &Destination) -> SendOutcome {
        let payload = Self::build_payload(
            message.display_title(),
            &message.content,
            message.has_url().then_some(message.url.as_str()),
            destination.param("template"),
        );
        self.post(destination, payload).await
    }

    async fn test(&self, destination: &Destination) -> bool {
        let payload =
            Self::build_payload("配置测试", "这是一条测试消息，您的PushMe配置正常！", None, None);
        self.post(destination, payload).await.is_success()
    }
}
