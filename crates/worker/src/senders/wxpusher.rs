use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use reminder_core::{
    models::{Destination, MessageRecord, PlatformKind, SendOutcome},
    traits::PlatformSender,
};

use super::{execute, forwarded_at, masking::mask_secret, HttpReply};

const SUCCESS_CODE: i64 = 1000;
const DEFAULT_SUMMARY_LENGTH: usize = 20;

/// 正文格式，取值与服务端 `contentType` 一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Text = 1,
    Html = 2,
    Markdown = 3,
}

impl ContentFormat {
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(2) => ContentFormat::Html,
            Some(3) => ContentFormat::Markdown,
            _ => ContentFormat::Text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    code: i64,
    #[serde(default)]
    msg: String,
}

/// 主题推送服务发送器
///
/// 目标参数：`appToken`（必填）、`uid` / `topicId`（至少一个）、
/// `contentType`（1文本 2HTML 3Markdown）、`summaryLength`。
/// 服务端总是返回200，成功与否看响应体里的 `code`。
pub struct WxPusherSender {
    client: reqwest::Client,
    api_url: String,
}

struct Credentials<'a> {
    app_token: &'a str,
    uid: Option<&'a str>,
    topic_id: Option<&'a str>,
}

fn credentials(destination: &Destination) -> Result<Credentials<'_>, String> {
    let app_token = destination
        .param("appToken")
        .ok_or_else(|| "WxPusher应用Token未配置".to_string())?;
    let uid = destination.param("uid");
    let topic_id = destination.param("topicId");
    if uid.is_none() && topic_id.is_none() {
        return Err("WxPusher用户UID或主题ID至少配置一个".to_string());
    }
    Ok(Credentials {
        app_token,
        uid,
        topic_id,
    })
}

impl WxPusherSender {
    pub fn new(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
        }
    }

    pub fn render_content(message: &MessageRecord, format: ContentFormat, sent_at: &str) -> String {
        let title = message.display_title();
        let mut out = String::new();
        match format {
            ContentFormat::Markdown => {
                out.push_str(&format!("## {title}\n\n{}\n\n", message.content));
                if message.has_url() {
                    out.push_str(&format!("[点击查看详情]({})\n\n", message.url));
                }
                out.push_str("---\n**消息信息**\n");
                out.push_str(&format!("- 类型：{}\n", message.type_label()));
                out.push_str(&format!("- 级别：{}\n", message.level_label()));
                if message.has_source() {
                    out.push_str(&format!("- 来源：{}\n", message.source));
                }
                out.push_str(&format!("- 时间：{sent_at}"));
            }
            ContentFormat::Html => {
                out.push_str(&format!("<h3>{title}</h3>"));
                out.push_str(&format!("<p>{}</p>", message.content.replace('\n', "<br>")));
                if message.has_url() {
                    out.push_str(&format!("<p><a href=\"{}\">点击查看详情</a></p>", message.url));
                }
                out.push_str("<hr><p><strong>消息信息</strong><br>");
                out.push_str(&format!("类型：{}<br>", message.type_label()));
                out.push_str(&format!("级别：{}<br>", message.level_label()));
                if message.has_source() {
                    out.push_str(&format!("来源：{}<br>", message.source));
                }
                out.push_str(&format!("时间：{sent_at}</p>"));
            }
            ContentFormat::Text => {
                out.push_str(&format!("{title}\n\n{}\n\n", message.content));
                if message.has_url() {
                    out.push_str(&format!("详情链接：{}\n", message.url));
                }
                out.push_str(&format!("类型：{}\n", message.type_label()));
                out.push_str(&format!("级别：{}\n", message.level_label()));
                if message.has_source() {
                    out.push_str(&format!("来源：{}\n", message.source));
                }
                out.push_str(&format!("时间：{sent_at}"));
            }
        }
        out
    }

    /// 摘要取标题前N个字符，超长时追加省略号
    pub fn summary(title: &str, max_chars: usize) -> String {
        if title.chars().count() <= max_chars {
            return title.to_string();
        }
        let mut summary: String = title.chars().take(max_chars).collect();
        summary.push_str("...");
        summary
    }

    fn build_payload(
        credentials: &Credentials<'_>,
        content: String,
        summary: String,
        format: ContentFormat,
        url: Option<&str>,
    ) -> Value {
        let mut payload = json!({
            "appToken": credentials.app_token,
            "content": content,
            "summary": summary,
            "contentType": format as i64,
        });
        if let Some(uid) = credentials.uid {
            payload["uids"] = json!([uid]);
        }
        if let Some(topic_id) = credentials.topic_id {
            payload["topicIds"] = json!([topic_id]);
        }
        if let Some(url) = url {
            payload["url"] = json!(url);
        }
        payload
    }

    async fn post(&self, destination_id: i64, payload: Value) -> SendOutcome {
        // 请求记录里不保留完整Token
        let mut recorded = payload.clone();
        if let Some(token) = payload["appToken"].as_str() {
            recorded["appToken"] = json!(mask_secret(token));
        }
        let request_data = recorded.to_string();

        match execute(self.client.post(&self.api_url).json(&payload)).await {
            Ok(reply) => reply_outcome(destination_id, request_data, reply),
            Err(e) => SendOutcome::failure(e).with_request(request_data),
        }
    }
}

/// HTTP状态和响应体里的 `code` 都成功才算成功
fn reply_outcome(destination_id: i64, request_data: String, reply: HttpReply) -> SendOutcome {
    if !reply.is_success() {
        return SendOutcome::failure(format!("HTTP错误: {}", reply.status))
            .with_request(request_data)
            .with_response(reply.body);
    }

    match serde_json::from_str::<ApiReply>(&reply.body) {
        Ok(api) if api.code == SUCCESS_CODE => SendOutcome::success(request_data, reply.body),
        Ok(api) => {
            warn!(
                "WxPusher返回错误: destination_id={}, code={}, msg={}",
                destination_id, api.code, api.msg
            );
            SendOutcome::failure(format!("API返回错误: {}", api.msg))
                .with_request(request_data)
                .with_response(reply.body)
        }
        Err(e) => SendOutcome::failure(format!("响应解析失败: {e}"))
            .with_request(request_data)
            .with_response(reply.body),
    }
}

#[async_trait]
impl PlatformSender for WxPusherSender {
    fn platform(&self) -> PlatformKind {
        PlatformKind::WxPusher
    }

    async fn send(&self, message: &MessageRecord, destination: &Destination) -> SendOutcome {
        let credentials = match credentials(destination) {
            Ok(c) => c,
            Err(e) => return SendOutcome::failure(e),
        };
        let format = ContentFormat::from_code(destination.param_i64("contentType"));
        let summary_length = destination
            .param_i64("summaryLength")
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_SUMMARY_LENGTH);

        let payload = Self::build_payload(
            &credentials,
            Self::render_content(message, format, &forwarded_at()),
            Self::summary(message.display_title(), summary_length),
            format,
            message.has_url().then_some(message.url.as_str()),
        );
        self.post(destination.id, payload).await
    }

    async fn test(&self, destination: &Destination) -> bool {
        let Ok(credentials) = credentials(destination) else {
            return false;
        };
        let payload = Self::build_payload(
            &credentials,
            "这是一条测试消息，您的WxPusher配置正常！".to_string(),
            "配置测试".to_string(),
            ContentFormat::Text,
            None,
        );
        self.post(destination.id, payload).await.is_success()
    }
}
