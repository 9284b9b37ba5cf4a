//! Gate - dispatch eligibility
//!
//! Pure decision over (now, schedule, run state, messages sent today). The
//! scheduler loop calls [`evaluate`] every tick; the dispatch runner reuses
//! [`within_business_hours`] to stop a batch when the window closes.
//!
//! Next-run rule:
//! 1. A configured start time in the future always wins (operators can push
//!    the schedule out at any time).
//! 2. Before the first run since startup: the configured start time if it has
//!    passed, otherwise now.
//! 3. After a run: last run + batch interval.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ScheduleConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Start a dispatch now with at most `batch_size` sends
    RunNow { batch_size: u32 },
    /// Not yet time
    Wait { until: NaiveDateTime },
    /// Auto-dispatch is off
    Disabled,
    /// Due, but a restriction applies
    Blocked(BlockReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    OutsideBusinessHours { start_hour: u32, end_hour: u32 },
    DailyCapReached { sent_today: u32, limit: u32 },
    DispatchActive { run_id: Uuid },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutsideBusinessHours { start_hour, end_hour } => {
                write!(f, "Outside business hours ({start_hour:02}:00-{end_hour:02}:00)")
            }
            Self::DailyCapReached { sent_today, limit } => {
                write!(f, "Daily limit reached ({sent_today}/{limit})")
            }
            Self::DispatchActive { run_id } => write!(f, "Dispatch {run_id} already in progress"),
        }
    }
}

/// Scheduler-side run state the gate depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    /// Start of the last automatic run since controller startup
    pub last_run: Option<NaiveDateTime>,
    pub active_dispatch: Option<Uuid>,
}

/// When the next automatic run is due. An unparseable start time counts as
/// unset.
pub fn next_run(
    now: NaiveDateTime,
    schedule: &ScheduleConfig,
    last_run: Option<NaiveDateTime>,
) -> NaiveDateTime {
    let configured_start = schedule.start_at().ok().flatten();

    match (configured_start, last_run) {
        (Some(start), _) if start > now => start,
        (Some(start), None) => start,
        (None, None) => now,
        (_, Some(last)) => last + Duration::minutes(i64::from(schedule.batch_interval)),
    }
}

/// `start_hour <= hour < end_hour` when gating is enabled; always true
/// otherwise.
pub fn within_business_hours(now: NaiveDateTime, schedule: &ScheduleConfig) -> bool {
    if !schedule.business_hours_only {
        return true;
    }
    let hour = now.hour();
    schedule.start_hour <= hour && hour < schedule.end_hour
}

pub fn evaluate(
    now: NaiveDateTime,
    schedule: &ScheduleConfig,
    run: &RunSnapshot,
    sent_today: u32,
) -> GateDecision {
    if !schedule.auto_enabled {
        return GateDecision::Disabled;
    }

    let due = next_run(now, schedule, run.last_run);
    if due > now {
        return GateDecision::Wait { until: due };
    }

    if !within_business_hours(now, schedule) {
        return GateDecision::Blocked(BlockReason::OutsideBusinessHours {
            start_hour: schedule.start_hour,
            end_hour: schedule.end_hour,
        });
    }

    if let Some(limit) = schedule.daily_cap() {
        if sent_today >= limit {
            return GateDecision::Blocked(BlockReason::DailyCapReached { sent_today, limit });
        }
    }

    if let Some(run_id) = run.active_dispatch {
        return GateDecision::Blocked(BlockReason::DispatchActive { run_id });
    }

    GateDecision::RunNow {
        batch_size: schedule.batch_size,
    }
}
