use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use reminder_core::{
    config::SmtpConfig,
    models::{Destination, MessageRecord, PlatformKind, SendOutcome},
    traits::PlatformSender,
    ReminderError, ReminderResult,
};

use super::{forwarded_at, masking::mask_email};

struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// 邮件发送器，目标参数：`toEmail`（必填）、`subjectPrefix`
pub struct EmailSender {
    mailer: Option<Mailer>,
}

impl EmailSender {
    /// 未提供SMTP配置时仍可注册，但每次发送都记为失败
    pub fn from_config(smtp: Option<&SmtpConfig>, timeout: Duration) -> ReminderResult<Self> {
        let Some(smtp) = smtp else {
            info!("未配置SMTP，邮件推送不可用");
            return Ok(Self { mailer: None });
        };

        let from: Mailbox = smtp
            .from
            .parse()
            .map_err(|e| ReminderError::Configuration(format!("发件人地址无效: {e}")))?;

        let relay = if smtp.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        };
        let builder = relay.map_err(|e| ReminderError::Configuration(format!("SMTP配置无效: {e}")))?;

        let transport = builder
            .port(smtp.port)
            .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            mailer: Some(Mailer { transport, from }),
        })
    }

    pub fn subject(prefix: Option<&str>, title: &str) -> String {
        match prefix {
            Some(prefix) => format!("{prefix} {title}"),
            None => title.to_string(),
        }
    }

    pub fn render_body(message: &MessageRecord, sent_at: &str) -> String {
        let mut body = format!("消息内容：\n{}\n\n", message.content);
        if message.has_url() {
            body.push_str(&format!("相关链接：{}\n", message.url));
        }
        body.push_str(&format!("消息类型：{}\n", message.type_label()));
        body.push_str(&format!("消息级别：{}\n", message.level_label()));
        if message.has_source() {
            body.push_str(&format!("数据来源：{}\n", message.source));
        }
        body.push_str(&format!("转发时间：{sent_at}"));
        body
    }

    async fn deliver(&self, destination: &Destination, subject: String, text: String) -> SendOutcome {
        let Some(to) = destination.param("toEmail") else {
            return SendOutcome::failure("收件人邮箱未配置");
        };
        let request_data = format!("To: {}, Subject: {}", mask_email(to), subject);
        let Some(mailer) = &self.mailer else {
            return SendOutcome::failure("邮件服务未配置").with_request(request_data);
        };

        let to: Mailbox = match to.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                return SendOutcome::failure(format!("收件人邮箱无效: {e}"))
                    .with_request(request_data)
            }
        };
        let email = match Message::builder()
            .from(mailer.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(text)
        {
            Ok(email) => email,
            Err(e) => {
                return SendOutcome::failure(format!("构建邮件失败: {e}")).with_request(request_data)
            }
        };

        match mailer.transport.send(email).await {
            Ok(_) => SendOutcome::success(request_data, "邮件发送成功"),
            Err(e) => {
                warn!("邮件发送失败: destination_id={}, error={}", destination.id, e);
                SendOutcome::failure(format!("邮件发送失败: {e}")).with_request(request_data)
            }
        }
    }
}

#[async_trait]
impl PlatformSender for EmailSender {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Email
    }

    async fn send(&self, message: &MessageRecord, destination: &Destination) -> SendOutcome {
        let subject = Self::subject(destination.param("subjectPrefix"), message.display_title());
        let text = Self::render_body(message, &forwarded_at());
        self.deliver(destination, subject, text).await
    }

    async fn test(&self, destination: &Destination) -> bool {
        let text = format!(
            "这是一条测试邮件，您的邮箱推送配置正常！\n\n测试时间：{}",
            forwarded_at()
        );
        self.deliver(destination, "配置测试".to_string(), text)
            .await
            .is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reminder_infrastructure::testing::{sample_destination, sample_message};
    use serde_json::json;

    fn destination(config: serde_json::Value) -> Destination {
        Destination {
            config,
            ..sample_destination(5, 100, "email")
        }
    }

    fn smtp() -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            username: "robot".to_string(),
            password: "secret".to_string(),
            from: "robot@example.com".to_string(),
            starttls: true,
        }
    }

    #[test]
    fn test_subject_and_body() {
        assert_eq!(EmailSender::subject(Some("[提醒]"), "开会"), "[提醒] 开会");
        assert_eq!(EmailSender::subject(None, "开会"), "开会");

        let mut message = sample_message(1, 100);
        message.source = "日历".to_string();
        let body = EmailSender::render_body(&message, "T");
        assert_eq!(
            body,
            "消息内容：\n测试内容\n\n消息类型：通知\n消息级别：普通\n数据来源：日历\n转发时间：T"
        );
    }

    #[tokio::test]
    async fn test_without_smtp_is_failure() {
        let sender = EmailSender::from_config(None, Duration::from_secs(1)).unwrap();
        let outcome = sender
            .send(
                &sample_message(1, 100),
                &destination(json!({"toEmail": "alice@example.com"})),
            )
            .await;
        assert_eq!(outcome.error.as_deref(), Some("邮件服务未配置"));
        assert_eq!(
            outcome.request_data.as_deref(),
            Some("To: al****@example.com, Subject: 测试标题")
        );
    }

    #[tokio::test]
    async fn test_missing_recipient_is_failure() {
        let sender = EmailSender::from_config(Some(&smtp()), Duration::from_secs(1)).unwrap();
        let outcome = sender
            .send(&sample_message(1, 100), &destination(json!({})))
            .await;
        assert_eq!(outcome.error.as_deref(), Some("收件人邮箱未配置"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_failure() {
        let sender = EmailSender::from_config(Some(&smtp()), Duration::from_secs(2)).unwrap();
        let dest = destination(json!({"toEmail": "alice@example.com"}));
        let outcome = sender.send(&sample_message(1, 100), &dest).await;
        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().starts_with("邮件发送失败"));
        assert!(!sender.test(&dest).await);
    }
}
