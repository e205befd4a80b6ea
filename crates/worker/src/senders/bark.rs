use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use reminder_core::{
    models::{Destination, MessageLevel, MessageRecord, PlatformKind, SendOutcome},
    traits::PlatformSender,
};

use super::{execute, forwarded_at, masking::mask_secret, status_outcome};

/// 移动端推送Webhook发送器
///
/// 目标参数：`deviceKey`（必填）、`serverUrl`、`sound`、`group`、`icon`。
pub struct BarkSender {
    client: reqwest::Client,
    default_server: String,
}

impl BarkSender {
    pub fn new(client: reqwest::Client, default_server: &str) -> Self {
        Self {
            client,
            default_server: default_server.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, destination: &Destination) -> Result<String, String> {
        let key = destination
            .param("deviceKey")
            .ok_or_else(|| "Bark设备Key未配置".to_string())?;
        let server = destination
            .param("serverUrl")
            .map(|s| s.trim_end_matches('/'))
            .unwrap_or(&self.default_server);
        Ok(format!("{server}/{key}"))
    }

    /// 本系统级别到推送应用中断级别的映射，普通级别不下发
    pub fn interruption_level(level: MessageLevel) -> Option<&'static str> {
        match level {
            MessageLevel::High | MessageLevel::Critical => Some("timeSensitive"),
            MessageLevel::Low => Some("passive"),
            MessageLevel::Normal => None,
        }
    }

    pub fn build_payload(message: &MessageRecord, destination: &Destination, sent_at: &str) -> Value {
        let mut body = message.content.clone();
        if message.has_source() {
            body.push_str(&format!("\n数据来源：{}", message.source));
        }
        body.push_str(&format!("\n转发时间：{sent_at}"));

        let mut payload = Map::new();
        payload.insert("title".into(), json!(message.display_title()));
        if let Some(subtitle) = message.subtitle.as_deref().filter(|s| !s.is_empty()) {
            payload.insert("subtitle".into(), json!(subtitle));
        }
        payload.insert("body".into(), json!(body));
        if message.has_url() {
            payload.insert("url".into(), json!(message.url));
        }
        if let Some(level) = Self::interruption_level(message.level) {
            payload.insert("level".into(), json!(level));
        }
        for key in ["sound", "icon"] {
            if let Some(value) = destination.param(key) {
                payload.insert(key.into(), json!(value));
            }
        }
        let group = destination.param("group").or(message.group.as_deref());
        if let Some(group) = group {
            payload.insert("group".into(), json!(group));
        }
        Value::Object(payload)
    }

    async fn post(&self, destination: &Destination, payload: Value) -> SendOutcome {
        let url = match self.endpoint(destination) {
            Ok(url) => url,
            Err(e) => return SendOutcome::failure(e),
        };
        let request_data = payload.to_string();
        debug!(
            "发送Bark推送: destination_id={}, key={}",
            destination.id,
            mask_secret(destination.param("deviceKey").unwrap_or_default())
        );

        let reply = execute(self.client.post(&url).json(&payload)).await;
        let outcome = status_outcome(request_data, reply);
        if let Some(error) = &outcome.error {
            warn!("Bark推送失败: destination_id={}, error={}", destination.id, error);
        }
        outcome
    }
}

#[async_trait]
impl PlatformSender for BarkSender {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Bark
    }

    async fn send(&self, message: &MessageRecord, destination: &Destination) -> SendOutcome {
        let payload = Self::build_payload(message, destination, &forwarded_at());
        self.post(destination, payload).await
    }

    async fn test(&self, destination: &Destination) -> bool {
        let payload = json!({
            "title": "配置测试",
            "body": "这是一条测试消息，您的Bark配置正常！",
            "group": "配置测试",
        });
        self.post(destination, payload).await.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reminder_infrastructure::testing::{sample_destination, sample_message};

    fn destination(config: Value) -> Destination {
        Destination {
            config,
            ..sample_destination(1, 100, "bark")
        }
    }

    #[test]
    fn test_payload_carries_source_and_level() {
        let mut message = sample_message(1, 100);
        message.source = "监控".to_string();
        message.url = "https://example.com".to_string();
        message.level = MessageLevel::Critical;
        message.subtitle = Some("副标题".to_string());

        let dest = destination(json!({"deviceKey": "k", "sound": "bell", "group": "运维"}));
        let payload = BarkSender::build_payload(&message, &dest, "2024-01-01 09:00:00");

        assert_eq!(payload["title"], "测试标题");
        assert_eq!(payload["subtitle"], "副标题");
        assert_eq!(
            payload["body"],
            "测试内容\n数据来源：监控\n转发时间：2024-01-01 09:00:00"
        );
        assert_eq!(payload["level"], "timeSensitive");
        assert_eq!(payload["sound"], "bell");
        assert_eq!(payload["group"], "运维");
        assert_eq!(payload["url"], "https://example.com");
    }

    #[test]
    fn test_normal_level_omitted() {
        let payload = BarkSender::build_payload(
            &sample_message(1, 100),
            &destination(json!({"deviceKey": "k"})),
            "t",
        );
        assert!(payload.get("level").is_none());
        assert!(payload.get("subtitle").is_none());
        assert!(payload.get("url").is_none());
    }

    #[test]
    fn test_endpoint_prefers_destination_server() {
        let sender = BarkSender::new(reqwest::Client::new(), "https://api.day.app/");
        assert_eq!(
            sender.endpoint(&destination(json!({"deviceKey": "abc"}))).unwrap(),
            "https://api.day.app/abc"
        );
        assert_eq!(
            sender
                .endpoint(&destination(json!({"deviceKey": "abc", "serverUrl": "http://bark.local/"})))
                .unwrap(),
            "http://bark.local/abc"
        );
    }

    #[tokio::test]
    async fn test_missing_device_key_is_failure() {
        let sender = BarkSender::new(reqwest::Client::new(), "https://api.day.app");
        let outcome = sender
            .send(&sample_message(1, 100), &destination(json!({})))
            .await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error.as_deref(), Some("Bark设备Key未配置"));
    }

    #[tokio::test]
    async fn test_transport_error_is_failure() {
        let sender = BarkSender::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let dest = destination(json!({"deviceKey": "abc"}));

        let outcome = sender.send(&sample_message(1, 100), &dest).await;
        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().starts_with("HTTP请求失败"));
        assert!(outcome.request_data.is_some());
        assert!(!sender.test(&dest).await);
    }
}
