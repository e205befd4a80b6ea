//! Metrics collector for the reminder system
//!
//! Built on the `metrics` facade. Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

pub struct MetricsCollector {
    messages_accepted_total: Counter,
    retries_enqueued_total: Counter,
    scheduled_timers: Gauge,
    occurrence_duration: Histogram,
    delivery_duration: Histogram,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_accepted_total: counter!("reminder_messages_accepted_total"),
            retries_enqueued_total: counter!("reminder_retries_enqueued_total"),
            scheduled_timers: gauge!("reminder_scheduled_timers"),
            occurrence_duration: histogram!("reminder_occurrence_duration_seconds"),
            delivery_duration: histogram!("reminder_delivery_duration_seconds"),
        }
    }

    /// Record one finished occurrence with its terminal outcome
    pub fn record_occurrence(&self, outcome: &'static str, duration_seconds: f64) {
        counter!("reminder_occurrences_total", "outcome" => outcome).increment(1);
        self.occurrence_duration.record(duration_seconds);
    }

    pub fn record_message_accepted(&self) {
        self.messages_accepted_total.increment(1);
    }

    pub fn record_delivery(&self, platform: &str, success: bool, duration_seconds: f64) {
        let status = if success { "success" } else { "failure" };
        counter!(
            "reminder_deliveries_total",
            "platform" => platform.to_string(),
            "status" => status
        )
        .increment(1);
        self.delivery_duration.record(duration_seconds);
    }

    pub fn record_retry_enqueued(&self) {
        self.retries_enqueued_total.increment(1);
    }

    pub fn update_scheduled_timers(&self, count: usize) {
        self.scheduled_timers.set(count as f64);
    }
}
