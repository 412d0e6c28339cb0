//! Scheduler - 遅延 / 定期 dispatch
//!
//! schedule はエンジンの他の部分へ `Dispatcher::dispatch` 経由でしか届かない。
//! scheduler が transport を直接触ることはない。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;
use crate::domain::{
    CourierError, CronError, CronExpression, DispatchOptions, Message, Schedule, ScheduleConfig,
    ScheduleId,
};
use crate::ports::{Clock, IdGenerator, SharedClock};

struct Entry {
    schedule: Schedule,
    /// Parsed once at schedule time for `ScheduleConfig::Cron`.
    cron: Option<CronExpression>,
}

pub struct Scheduler {
    entries: Mutex<HashMap<ScheduleId, Entry>>,
    id_generator: Arc<dyn IdGenerator>,
    clock: SharedClock,
}

impl Scheduler {
    pub fn new(id_generator: Arc<dyn IdGenerator>, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            id_generator,
            clock,
        }
    }

    pub async fn schedule(
        &self,
        message: Message,
        config: ScheduleConfig,
    ) -> Result<ScheduleId, CourierError> {
        self.schedule_with_options(message, config, DispatchOptions::default())
            .await
    }

    /// Register a schedule. Everything is validated here, so a schedule that
    /// was accepted never fails to compute its next run later on:
    /// - empty message type: validation error
    /// - invalid cron expression: `CourierError::InvalidCron`
    /// - zero interval: configuration error
    ///
    /// A `Once` time in the past is accepted and fires on the next tick.
    pub async fn schedule_with_options(
        &self,
        message: Message,
        config: ScheduleConfig,
        options: DispatchOptions,
    ) -> Result<ScheduleId, CourierError> {
        message.validate()?;
        let now = self.clock.now();

        let (next_run_time, cron) = match &config {
            ScheduleConfig::Once { at } => (*at, None),
            ScheduleConfig::Interval { period } => {
                if period.is_zero() {
                    return Err(CourierError::Configuration(
                        "schedule interval must be greater than zero".to_string(),
                    ));
                }
                (advance(now, *period)?, None)
            }
            ScheduleConfig::Cron { expression } => {
                let cron = CronExpression::parse(expression)?;
                let next = cron
                    .next_after(now)
                    .ok_or_else(|| CronError::NoUpcoming(expression.clone()))?;
                (next, Some(cron))
            }
        };

        let id = self.id_generator.generate_schedule_id();
        let schedule = Schedule {
            id,
            message,
            options,
            config,
            next_run_time,
            active: true,
            fired_count: 0,
        };

        debug!(
            schedule_id = %id,
            message_type = %schedule.message.message_type(),
            next_run_time = %next_run_time,
            "schedule registered"
        );
        self.entries.lock().await.insert(id, Entry { schedule, cron });
        Ok(id)
    }

    /// Active schedules with `next_run_time <= now`, earliest first.
    pub async fn get_due_schedules(&self) -> Vec<Schedule> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        let mut due: Vec<Schedule> = entries
            .values()
            .filter(|entry| entry.schedule.is_due(now))
            .map(|entry| entry.schedule.clone())
            .collect();
        due.sort_by_key(|schedule| (schedule.next_run_time, schedule.id));
        due
    }

    pub async fn get(&self, id: ScheduleId) -> Option<Schedule> {
        self.entries
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.schedule.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Remove a schedule. Returns `false` for unknown (or already finished) ids.
    pub async fn cancel(&self, id: ScheduleId) -> bool {
        let removed = self.entries.lock().await.remove(&id).is_some();
        if removed {
            debug!(schedule_id = %id, "schedule cancelled");
        }
        removed
    }

    /// Record that a schedule fired and move it to its next run.
    ///
    /// - `Once`: removed
    /// - `Interval`: advanced by whole periods until it is in the future;
    ///   missed periods are skipped, not replayed
    /// - `Cron`: next occurrence after now
    ///
    /// Returns the next run time, or `None` if the schedule has ended (or
    /// was unknown).
    pub async fn mark_fired(&self, id: ScheduleId) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&id)?;
        entry.schedule.fired_count += 1;

        let next = match (&entry.schedule.config, &entry.cron) {
            (ScheduleConfig::Once { .. }, _) => None,
            (ScheduleConfig::Interval { period }, _) => {
                next_interval_run(entry.schedule.next_run_time, *period, now)
            }
            (ScheduleConfig::Cron { .. }, Some(cron)) => cron.next_after(now),
            (ScheduleConfig::Cron { .. }, None) => None,
        };

        match next {
            Some(next) => {
                entry.schedule.next_run_time = next;
                Some(next)
            }
            None => {
                entries.remove(&id);
                None
            }
        }
    }

    /// Dispatch every due schedule, then advance it. A failed dispatch is
    /// logged and the schedule advances anyway, so one bad schedule cannot
    /// fire in a tight loop. Returns the number of successful dispatches.
    pub async fn tick(&self, dispatcher: &Dispatcher) -> usize {
        let mut dispatched = 0;
        for schedule in self.get_due_schedules().await {
            match dispatcher
                .dispatch(schedule.message.clone(), schedule.options.clone())
                .await
            {
                Ok(result) => {
                    dispatched += 1;
                    info!(
                        schedule_id = %schedule.id,
                        message_id = %result.message_id,
                        message_type = %schedule.message.message_type(),
                        "schedule fired"
                    );
                }
                Err(e) => {
                    error!(
                        schedule_id = %schedule.id,
                        message_type = %schedule.message.message_type(),
                        error = %e,
                        "scheduled dispatch failed"
                    );
                }
            }
            self.mark_fired(schedule.id).await;
        }
        dispatched
    }
}

fn advance(from: DateTime<Utc>, period: std::time::Duration) -> Result<DateTime<Utc>, CourierError> {
    chrono::Duration::from_std(period)
        .ok()
        .and_then(|period| from.checked_add_signed(period))
        .ok_or_else(|| CourierError::Configuration(format!("interval {period:?} is too large")))
}

/// First `previous + k * period` (k >= 1) that is after `now`.
fn next_interval_run(
    previous: DateTime<Utc>,
    period: std::time::Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let period = chrono::Duration::from_std(period).ok()?;
    let period_ms = period.num_milliseconds().max(1);
    let behind_ms = (now - previous).num_milliseconds().max(0);
    let steps = behind_ms / period_ms + 1;
    previous.checked_add_signed(chrono::Duration::milliseconds(steps.checked_mul(period_ms)?))
}
