//! 外部推送请求解析
//!
//! 支持三种入口：结构化JSON、移动推送应用风格的POST请求体、
//! 以及 `key/title/subtitle/content` 形式的旧版路径。查询串中的同名参数优先。

use serde_json::{Map, Value};
use url::form_urlencoded;

use reminder_core::{
    models::{MessageLevel, MessageType, PushRequest},
    ReminderError, ReminderResult,
};

/// 缺少标题但有内容时使用的默认标题
pub const DEFAULT_TITLE: &str = "新消息";

/// 一次外部推送调用
#[derive(Debug, Clone, PartialEq)]
pub enum PushInput {
    /// 完整的结构化请求
    Json { body: String },
    /// `POST /{userKey}`，请求体为 `title`/`body`/`url`/`level`/`category`/`tags`
    BarkPost {
        user_key: String,
        body: Option<String>,
        query: Option<String>,
    },
    /// `GET /{userKey}[/{title}[/{subtitle}]/{content}]`
    Path { path: String, query: Option<String> },
}

impl PushInput {
    pub fn into_request(self) -> ReminderResult<PushRequest> {
        match self {
            PushInput::Json { body } => parse_json(&body),
            PushInput::BarkPost {
                user_key,
                body,
                query,
            } => {
                let mut request = parse_bark_body(&user_key, body.as_deref())?;
                if let Some(query) = query {
                    PushQuery::parse(&query).apply(&mut request);
                }
                Ok(request)
            }
            PushInput::Path { path, query } => {
                let mut request = parse_path(&path)?;
                if let Some(query) = query {
                    PushQuery::parse(&query).apply(&mut request);
                }
                Ok(with_default_title(request))
            }
        }
    }
}

/// 查询串覆盖参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushQuery {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub level: Option<String>,
    pub category: Option<String>,
    pub group: Option<String>,
}

impl PushQuery {
    pub fn parse(query: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match &*key {
                "title" => &mut parsed.title,
                "body" => &mut parsed.body,
                "url" => &mut parsed.url,
                "level" => &mut parsed.level,
                "category" => &mut parsed.category,
                "group" => &mut parsed.group,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        parsed
    }

    pub fn apply(self, request: &mut PushRequest) {
        if self.title.is_some() {
            request.title = self.title;
        }
        if self.body.is_some() {
            request.content = self.body;
        }
        if self.url.is_some() {
            request.url = self.url;
        }
        if self.group.is_some() {
            request.group = self.group;
        }
        if let Some(level) = self.level {
            request.level = MessageLevel::from_external(&level);
        }
        if let Some(category) = self.category {
            request.message_type = MessageType::parse_lenient(Some(&category));
        }
    }
}

pub fn parse_json(body: &str) -> ReminderResult<PushRequest> {
    Ok(serde_json::from_str(body)?)
}

pub fn parse_bark_body(user_key: &str, body: Option<&str>) -> ReminderResult<PushRequest> {
    let body = body
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ReminderError::validation("请求体不能为空"))?;
    let fields: Map<String, Value> = serde_json::from_str(body)?;
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let tags = fields
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(PushRequest {
        user_key: Some(user_key.to_string()),
        title: text("title"),
        content: text("body").or_else(|| text("content")),
        url: text("url"),
        level: text("level")
            .filter(|l| !l.trim().is_empty())
            .map(|l| MessageLevel::from_external(&l))
            .unwrap_or_default(),
        message_type: MessageType::parse_lenient(text("category").as_deref()),
        tags,
        ..Default::default()
    })
}

/// 按段数解析旧版路径：1段只有key，2段为标题，3段为标题和内容，4段含副标题
pub fn parse_path(path: &str) -> ReminderResult<PushRequest> {
    let segments = path
        .trim_matches('/')
        .split('/')
        .map(decode_segment)
        .collect::<Vec<_>>();

    let (user_key, title, subtitle, content) = match segments.as_slice() {
        [key] => (key, None, None, None),
        [key, title] => (key, Some(title), None, None),
        [key, title, content] => (key, Some(title), None, Some(content)),
        [key, title, subtitle, content] => (key, Some(title), Some(subtitle), Some(content)),
        _ => {
            return Err(ReminderError::validation(format!(
                "无法识别的推送路径: {path}"
            )))
        }
    };
    if user_key.trim().is_empty() {
        return Err(ReminderError::validation("用户标识不能为空"));
    }

    let non_blank = |v: Option<&String>| v.filter(|s| !s.trim().is_empty()).cloned();
    Ok(PushRequest {
        user_key: Some(user_key.clone()),
        title: non_blank(title),
        subtitle: non_blank(subtitle),
        content: non_blank(content),
        ..Default::default()
    })
}

/// 解码失败时保留原文
fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn with_default_title(mut request: PushRequest) -> PushRequest {
    let blank = |v: &Option<String>| !v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if blank(&request.title) && !blank(&request.content) {
        request.title = Some(DEFAULT_TITLE.to_string());
    }
    request
}
