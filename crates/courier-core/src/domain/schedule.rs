//! Schedule records: standing definitions that periodically produce dispatches.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dispatch::DispatchOptions;
use super::ids::ScheduleId;
use super::message::Message;

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Fire once at `at`, then end.
    Once { at: DateTime<Utc> },
    /// Fire on every match of a 5-field cron expression.
    Cron { expression: String },
    /// Fire every `period`, starting one period after scheduling.
    Interval { period: Duration },
}

impl ScheduleConfig {
    pub fn once(at: DateTime<Utc>) -> Self {
        ScheduleConfig::Once { at }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        ScheduleConfig::Cron {
            expression: expression.into(),
        }
    }

    pub fn interval(period: Duration) -> Self {
        ScheduleConfig::Interval { period }
    }
}

/// A schedule owned by the `Scheduler`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub message: Message,
    pub options: DispatchOptions,
    pub config: ScheduleConfig,
    pub next_run_time: DateTime<Utc>,
    pub active: bool,
    /// Number of times this schedule has produced a dispatch.
    pub fired_count: u64,
}

impl Schedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run_time <= now
    }
}
