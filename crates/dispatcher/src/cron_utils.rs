use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use tracing::{debug, warn};

use reminder_core::{ReminderError, ReminderResult};

const FIELD_SECOND: usize = 0;
const FIELD_MINUTE: usize = 1;
const FIELD_HOUR: usize = 2;
const FIELD_DAY_OF_MONTH: usize = 3;
const FIELD_MONTH: usize = 4;
const FIELD_DAY_OF_WEEK: usize = 5;
const FIELD_YEAR: usize = 6;

/// CRON表达式解析和求值
///
/// 支持 6 字段（秒 分 时 日 月 周）或 7 字段（追加年）格式，
/// 日和周字段接受 `?` 表示"任意"。周字段数字 1 表示周日，7 表示周六。
#[derive(Debug)]
pub struct CronEvaluator {
    expression: String,
    schedule: Schedule,
}

impl CronEvaluator {
    /// 解析表达式，语法错误返回 [`ReminderError::InvalidCron`]
    pub fn new(cron_expr: &str) -> ReminderResult<Self> {
        let normalized = Self::normalize(cron_expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| ReminderError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 验证CRON表达式是否有效
    pub fn validate(cron_expr: &str) -> bool {
        Self::new(cron_expr).is_ok()
    }

    pub fn validate_cron_expression(cron_expr: &str) -> ReminderResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// `after` 之后（严格晚于）的下一次触发时间，按 `tz` 求值
    ///
    /// 一次性表达式触发过后返回 `None`，调用方据此判断已耗尽。
    pub fn next_fire_after(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Tz>> {
        let next = self.schedule.after(&after.with_timezone(&tz)).next();
        if next.is_none() {
            debug!("CRON表达式没有后续触发时间: {}", self.expression);
        }
        next
    }

    /// 解析并求值的便捷方法
    pub fn next_fire(
        cron_expr: &str,
        tz: Tz,
        after: DateTime<Utc>,
    ) -> ReminderResult<Option<DateTime<Tz>>> {
        Ok(Self::new(cron_expr)?.next_fire_after(tz, after))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, tz: Tz, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Tz>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .take(count)
            .collect()
    }

    /// 规范化为 cron 库可接受的形式
    ///
    /// 校验字段数量，把 `?` 替换为 `*`，名称统一大写。
    pub fn normalize(cron_expr: &str) -> ReminderResult<String> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        if fields.len() != 6 && fields.len() != 7 {
            return Err(ReminderError::InvalidCron {
                expr: cron_expr.to_string(),
                message: format!("需要6或7个字段，实际为{}个", fields.len()),
            });
        }

        let normalized: Vec<String> = fields
            .iter()
            .map(|field| {
                if *field == "?" {
                    "*".to_string()
                } else {
                    field.to_ascii_uppercase()
                }
            })
            .collect();
        Ok(normalized.join(" "))
    }

    /// 生成中文描述，无法识别的形式原样返回表达式
    ///
    /// ```
    /// use reminder_dispatcher::cron_utils::CronEvaluator;
    ///
    /// assert_eq!(CronEvaluator::describe("0 0 9 * * ?"), "每天 09:00");
    /// assert_eq!(CronEvaluator::describe("0 30 8 ? * MON"), "每周一 08:30");
    /// assert_eq!(CronEvaluator::describe("0 0 9 15 * ?"), "每月15日 09:00");
    /// assert_eq!(CronEvaluator::describe("0 0 9 1 1 ? 2024"), "2024年1月1日 09:00");
    /// ```
    pub fn describe(cron_expr: &str) -> String {
        match Self::describe_fields(cron_expr) {
            Some(text) => text,
            None => {
                if !Self::validate(cron_expr) {
                    warn!("无法描述无效的CRON表达式: {}", cron_expr);
                }
                cron_expr.trim().to_string()
            }
        }
    }

    fn describe_fields(cron_expr: &str) -> Option<String> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        if fields.len() != 6 && fields.len() != 7 {
            return None;
        }

        let second: u32 = fields[FIELD_SECOND].parse().ok()?;
        let minute: u32 = fields[FIELD_MINUTE].parse().ok()?;
        let hour: u32 = fields[FIELD_HOUR].parse().ok()?;
        if second > 59 || minute > 59 || hour > 23 {
            return None;
        }
        let time = if second == 0 {
            format!("{hour:02}:{minute:02}")
        } else {
            format!("{hour:02}:{minute:02}:{second:02}")
        };

        let day = fields[FIELD_DAY_OF_MONTH];
        let month = fields[FIELD_MONTH];
        let weekday = fields[FIELD_DAY_OF_WEEK];
        let year = fields.get(FIELD_YEAR).copied().unwrap_or("*");

        if is_plain_number(year) && is_plain_number(month) && is_plain_number(day) && is_any(weekday) {
            return Some(format!("{year}年{month}月{day}日 {time}"));
        }
        if !is_any(year) || !is_any(month) {
            return None;
        }

        match (is_any(day), is_any(weekday)) {
            (true, true) => Some(format!("每天 {time}")),
            (true, false) => Some(format!("每周{} {time}", describe_weekdays(weekday)?)),
            (false, true) if is_plain_number(day) => Some(format!("每月{day}日 {time}")),
            _ => None,
        }
    }
}

fn is_any(field: &str) -> bool {
    field == "*" || field == "?"
}

fn is_plain_number(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_digit())
}

fn weekday_name(token: &str) -> Option<&'static str> {
    match token.to_ascii_uppercase().as_str() {
        "SUN" | "1" => Some("日"),
        "MON" | "2" => Some("一"),
        "TUE" | "3" => Some("二"),
        "WED" | "4" => Some("三"),
        "THU" | "5" => Some("四"),
        "FRI" | "6" => Some("五"),
        "SAT" | "7" => Some("六"),
        _ => None,
    }
}

/// `MON` → `一`，`MON,WED` → `一、三`，`MON-FRI` → `一至五`
fn describe_weekdays(field: &str) -> Option<String> {
    let mut parts = Vec::new();
    for item in field.split(',') {
        match item.split_once('-') {
            Some((from, to)) => {
                parts.push(format!("{}至{}", weekday_name(from)?, weekday_name(to)?));
            }
            None => parts.push(weekday_name(item)?.to_string()),
        }
    }
    Some(parts.join("、"))
}
