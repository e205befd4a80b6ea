use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use reminder_core::{
    models::{Destination, MessageRecord, PlatformKind, SendOutcome},
    traits::PlatformSender,
};

use super::{execute, forwarded_at, status_outcome};

/// 通用Webhook发送器
///
/// 目标参数：`url`（必填）、`method`（POST/PUT/GET，默认POST）、`headers`（对象）。
/// POST和PUT以JSON发送消息字段，GET把同样的字段放进查询串。
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn build_payload(message: &MessageRecord, sent_at: &str) -> Value {
        json!({
            "messageId": message.id,
            "type": message.message_type.as_str(),
            "level": message.level.as_str(),
            "title": message.display_title(),
            "subtitle": message.subtitle,
            "content": message.content,
            "url": message.url,
            "source": message.source,
            "tags": message.tags,
            "extraData": message.extra_data,
            "timestamp": sent_at,
        })
    }

    fn request(&self, destination: &Destination, payload: &Value) -> Result<reqwest::RequestBuilder, String> {
        let url = destination
            .param("url")
            .ok_or_else(|| "Webhook地址未配置".to_string())?;
        let method = destination.param("method").unwrap_or("POST").to_uppercase();

        let mut request = match method.as_str() {
            "POST" => self.client.post(url).json(payload),
            "PUT" => self.client.put(url).json(payload),
            "GET" => {
                let query: Vec<(&str, String)> = ["title", "content", "url", "level"]
                    .into_iter()
                    .filter_map(|key| {
                        payload[key]
                            .as_str()
                            .filter(|v| !v.is_empty())
                            .map(|v| (key, v.to_string()))
                    })
                    .collect();
                self.client.get(url).query(&query)
            }
            other => return Err(format!("不支持的HTTP方法: {other}")),
        };

        if let Some(headers) = destination.config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }
        Ok(request)
    }

    async fn deliver(&self, destination: &Destination, payload: Value) -> SendOutcome {
        let request = match self.request(destination, &payload) {
            Ok(request) => request,
            Err(e) => return SendOutcome::failure(e),
        };
        let outcome = status_outcome(payload.to_string(), execute(request).await);
        if let Some(error) = &outcome.error {
            warn!("Webhook推送失败: destination_id={}, error={}", destination.id, error);
        }
        outcome
    }
}

#[async_trait]
impl PlatformSender for WebhookSender {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Webhook
    }

    async fn send(&self, message: &MessageRecord, destination: &Destination) -> SendOutcome {
        self.deliver(destination, Self::build_payload(message, &forwarded_at()))
            .await
    }

    async fn test(&self, destination: &Destination) -> bool {
        let payload = json!({
            "title": "配置测试",
            "content": "这是一条测试消息，您的Webhook配置正常！",
            "timestamp": forwarded_at(),
        });
        self.deliver(destination, payload).await.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reminder_infrastructure::testing::{sample_destination, sample_message};

    fn destination(config: Value) -> Destination {
        Destination {
            config,
            ..sample_destination(4, 100, "webhook")
        }
    }

    #[test]
    fn test_payload_fields() {
        let mut message = sample_message(9, 100);
        message.tags = vec!["billing".to_string()];
        let payload = WebhookSender::build_payload(&message, "T");
        assert_eq!(payload["messageId"], 9);
        assert_eq!(payload["type"], "notification");
        assert_eq!(payload["tags"], json!(["billing"]));
    }

    #[test]
    fn test_get_request_uses_query() {
        let sender = WebhookSender::new(reqwest::Client::new());
        let dest = destination(json!({
            "url": "http://hook.local/notify",
            "method": "get",
            "headers": {"X-Token": "abc"}
        }));
        let payload = WebhookSender::build_payload(&sample_message(1, 100), "T");

        let request = sender.request(&dest, &payload).unwrap().build().unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert!(request.url().query().unwrap().contains("title="));
        assert_eq!(request.headers()["X-Token"], "abc");
        assert!(request.body().is_none());
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_failure() {
        let sender = WebhookSender::new(reqwest::Client::new());
        let message = sample_message(1, 100);

        let outcome = sender.send(&message, &destination(json!({}))).await;
        assert_eq!(outcome.error.as_deref(), Some("Webhook地址未配置"));

        let outcome = sender
            .send(
                &message,
                &destination(json!({"url": "http://127.0.0.1:9", "method": "DELETE"})),
            )
            .await;
        assert_eq!(outcome.error.as_deref(), Some("不支持的HTTP方法: DELETE"));
    }

    #[tokio::test]
    async fn test_transport_error_is_failure() {
        let sender = WebhookSender::new(reqwest::Client::new());
        let outcome = sender
            .send(
                &sample_message(1, 100),
                &destination(json!({"url": "http://127.0.0.1:9/hook"})),
            )
            .await;
        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().starts_with("HTTP请求失败"));
    }
}
