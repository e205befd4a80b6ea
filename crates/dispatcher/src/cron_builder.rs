//! 由简化的调度配置生成CRON表达式

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};

use reminder_core::{models::ScheduleType, ReminderError, ReminderResult};

use crate::cron_utils::CronEvaluator;

pub struct CronBuilder;

impl CronBuilder {
    /// 一次性任务：固定到年月日时分，只触发一次
    pub fn once(execute_at: NaiveDateTime) -> String {
        format!(
            "0 {} {} {} {} ? {}",
            execute_at.minute(),
            execute_at.hour(),
            execute_at.day(),
            execute_at.month(),
            execute_at.year()
        )
    }

    /// 每日任务，`weekdays` 为空表示每天
    pub fn daily(time: NaiveTime, weekdays: &[Weekday]) -> String {
        if weekdays.is_empty() {
            return format!("0 {} {} * * ?", time.minute(), time.hour());
        }
        let days: Vec<&str> = weekdays.iter().map(|d| weekday_code(*d)).collect();
        format!("0 {} {} ? * {}", time.minute(), time.hour(), days.join(","))
    }

    pub fn weekly(weekday: Weekday, time: NaiveTime) -> String {
        format!("0 {} {} ? * {}", time.minute(), time.hour(), weekday_code(weekday))
    }

    pub fn monthly(day_of_month: u32, time: NaiveTime) -> ReminderResult<String> {
        if !(1..=31).contains(&day_of_month) {
            return Err(ReminderError::validation("月份中的天数必须在1-31之间"));
        }
        Ok(format!("0 {} {} {} * ?", time.minute(), time.hour(), day_of_month))
    }

    /// 按调度类型生成，`custom` 直接校验传入的表达式
    pub fn build(schedule: &ScheduleConfig) -> ReminderResult<(ScheduleType, String)> {
        let expr = match schedule {
            ScheduleConfig::Once { execute_at } => (ScheduleType::Once, Self::once(*execute_at)),
            ScheduleConfig::Daily { time, weekdays } => {
                (ScheduleType::Daily, Self::daily(*time, weekdays))
            }
            ScheduleConfig::Weekly { weekday, time } => {
                (ScheduleType::Weekly, Self::weekly(*weekday, *time))
            }
            ScheduleConfig::Monthly { day_of_month, time } => {
                (ScheduleType::Monthly, Self::monthly(*day_of_month, *time)?)
            }
            ScheduleConfig::Custom { expression } => {
                (ScheduleType::Custom, expression.trim().to_string())
            }
        };
        CronEvaluator::validate_cron_expression(&expr.1)?;
        Ok(expr)
    }
}

/// 简化的调度配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleConfig {
    Once { execute_at: NaiveDateTime },
    Daily { time: NaiveTime, weekdays: Vec<Weekday> },
    Weekly { weekday: Weekday, time: NaiveTime },
    Monthly { day_of_month: u32, time: NaiveTime },
    Custom { expression: String },
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn test_builders_produce_valid_expressions() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(CronBuilder::once(at), "0 30 9 1 1 ? 2024");
        assert_eq!(CronBuilder::daily(nine(), &[]), "0 0 9 * * ?");
        assert_eq!(
            CronBuilder::daily(nine(), &[Weekday::Mon, Weekday::Fri]),
            "0 0 9 ? * MON,FRI"
        );
        assert_eq!(CronBuilder::weekly(Weekday::Sun, nine()), "0 0 9 ? * SUN");
        assert_eq!(CronBuilder::monthly(15, nine()).unwrap(), "0 0 9 15 * ?");

        for expr in [
            CronBuilder::once(at),
            CronBuilder::daily(nine(), &[Weekday::Tue]),
            CronBuilder::weekly(Weekday::Sat, nine()),
            CronBuilder::monthly(31, nine()).unwrap(),
        ] {
            assert!(CronEvaluator::validate(&expr), "{expr}");
        }
    }

    #[test]
    fn test_monthly_day_range() {
        assert!(CronBuilder::monthly(0, nine()).unwrap_err().is_validation());
        assert!(CronBuilder::monthly(32, nine()).is_err());
    }

    #[test]
    fn test_build_by_type() {
        let (kind, expr) = CronBuilder::build(&ScheduleConfig::Weekly {
            weekday: Weekday::Mon,
            time: nine(),
        })
        .unwrap();
        assert_eq!(kind, ScheduleType::Weekly);
        assert_eq!(CronEvaluator::describe(&expr), "每周一 09:00");

        let err = CronBuilder::build(&ScheduleConfig::Custom {
            expression: "not a cron".to_string(),
        })
        .unwrap_err();
        assert!(err.is_validation());
    }
}
