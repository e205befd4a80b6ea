use serde::{Deserialize, Serialize};

/// 推送通道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendersConfig {
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub bark_server_url: String,
    pub wxpusher_api_url: String,
    pub pushme_api_url: String,
    /// 未配置时邮件通道的每次发送都记为失败
    pub smtp: Option<SmtpConfig>,
}

impl Default for SendersConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            read_timeout_seconds: 30,
            bark_server_url: "https://api.day.app".to_string(),
            wxpusher_api_url: "https://wxpusher.zjiecode.com/api/send/message".to_string(),
            pushme_api_url: "https://push.i-i.me".to_string(),
            smtp: None,
        }
    }
}

impl SendersConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connect_timeout_seconds == 0 || self.read_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("推送超时时间必须大于0"));
        }

        for (name, url) in [
            ("bark_server_url", &self.bark_server_url),
            ("wxpusher_api_url", &self.wxpusher_api_url),
            ("pushme_api_url", &self.pushme_api_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("{name} 必须是HTTP地址: {url}"));
            }
        }

        if let Some(smtp) = &self.smtp {
            smtp.validate()?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

impl SmtpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("SMTP主机不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("SMTP端口必须大于0"));
        }

        if !self.from.contains('@') {
            return Err(anyhow::anyhow!("发件人地址无效: {}", self.from));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` 或 `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.level,
                valid_levels
            ));
        }

        if self.format != "json" && self.format != "pretty" {
            return Err(anyhow::anyhow!("日志格式必须是json或pretty: {}", self.format));
        }

        Ok(())
    }
}
