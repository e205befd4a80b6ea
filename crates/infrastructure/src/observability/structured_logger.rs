//! 结构化日志
//!
//! 生命周期关键点以固定的 `event` 字段输出，便于按事件检索。

use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_occurrence_scheduled(
        task_id: i64,
        task_name: &str,
        fire_at: DateTime<Utc>,
        timezone: &str,
    ) {
        info!(
            event = "occurrence_scheduled",
            task.id = task_id,
            task.name = task_name,
            task.fire_at = %fire_at,
            task.timezone = timezone,
            "任务已加入调度"
        );
    }

    pub fn log_lock_denied(task_id: i64, lock_key: &str, node_id: &str, holder: Option<&str>) {
        info!(
            event = "lock_denied",
            task.id = task_id,
            lock.key = lock_key,
            node.id = node_id,
            lock.holder = holder.unwrap_or("unknown"),
            "获取分布式锁失败，任务已被其他节点执行"
        );
    }

    pub fn log_occurrence_finished(
        task_id: i64,
        outcome: &str,
        duration_ms: i64,
        message_id: Option<i64>,
        error: Option<&str>,
    ) {
        if outcome == "failed" {
            warn!(
                event = "occurrence_finished",
                task.id = task_id,
                task.outcome = outcome,
                task.duration_ms = duration_ms,
                task.error = error.unwrap_or(""),
                "任务执行失败"
            );
        } else {
            info!(
                event = "occurrence_finished",
                task.id = task_id,
                task.outcome = outcome,
                task.duration_ms = duration_ms,
                message.id = message_id.unwrap_or_default(),
                task.reason = error.unwrap_or(""),
                "任务执行结束"
            );
        }
    }

    pub fn log_message_accepted(message_id: i64, owner_id: i64, tags: &[String]) {
        info!(
            event = "message_accepted",
            message.id = message_id,
            owner.id = owner_id,
            message.tags = ?tags,
            "消息已受理"
        );
    }

    pub fn log_delivery_attempted(
        message_id: i64,
        destination_id: i64,
        platform: &str,
        success: bool,
        retry_count: i32,
        error: Option<&str>,
    ) {
        if success {
            info!(
                event = "delivery_attempted",
                message.id = message_id,
                destination.id = destination_id,
                destination.platform = platform,
                delivery.retry_count = retry_count,
                delivery.success = true,
                "消息推送成功"
            );
        } else {
            warn!(
                event = "delivery_attempted",
                message.id = message_id,
                destination.id = destination_id,
                destination.platform = platform,
                delivery.retry_count = retry_count,
                delivery.success = false,
                delivery.error = error.unwrap_or(""),
                "消息推送失败"
            );
        }
    }

    pub fn log_retry_enqueued(
        message_id: i64,
        destination_id: i64,
        retry_count: i32,
        due_at: DateTime<Utc>,
    ) {
        info!(
            event = "retry_enqueued",
            message.id = message_id,
            destination.id = destination_id,
            retry.count = retry_count,
            retry.due_at = %due_at,
            "已加入重试队列"
        );
    }

    pub fn log_daily_refresh_finished(for_date: &str, scheduled: usize, skipped: usize, duration_ms: u128) {
        info!(
            event = "daily_refresh_finished",
            refresh.date = for_date,
            refresh.scheduled = scheduled,
            refresh.skipped = skipped,
            refresh.duration_ms = duration_ms as u64,
            "每日任务刷新完成"
        );
    }
}
