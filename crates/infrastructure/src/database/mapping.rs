use reminder_core::ReminderResult;
use sqlx::{sqlite::SqliteRow, Row};

/// JSON文本列与Rust值之间的转换
pub struct MappingHelpers;

impl MappingHelpers {
    /// 解析JSON数组列，空值或格式错误时返回空列表
    pub fn parse_string_list(row: &SqliteRow, column: &str) -> Vec<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .and_then(|json_str| serde_json::from_str(&json_str).ok())
            .unwrap_or_default()
    }

    pub fn parse_id_list(row: &SqliteRow, column: &str) -> Vec<i64> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .and_then(|json_str| serde_json::from_str(&json_str).ok())
            .unwrap_or_default()
    }

    /// 解析JSON对象列，空值时返回空对象
    pub fn parse_json_value(row: &SqliteRow, column: &str) -> ReminderResult<serde_json::Value> {
        let raw: Option<String> = row.try_get(column)?;
        match raw {
            Some(json_str) if !json_str.trim().is_empty() => Ok(serde_json::from_str(&json_str)?),
            _ => Ok(serde_json::json!({})),
        }
    }

    pub fn to_json_text<T: serde::Serialize + ?Sized>(value: &T) -> ReminderResult<String> {
        Ok(serde_json::to_string(value)?)
    }
}
