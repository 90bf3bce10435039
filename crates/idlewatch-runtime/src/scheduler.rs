//! Once-per-day digest scheduling.
//!
//! The decision for a tick depends only on the local wall-clock minute, the
//! configured push time and the persisted day marker. The marker is the
//! single source of truth for "already ran today", so restarts and slow
//! ticks cannot fire the digest twice.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use idlewatch_policy::{MissedWindowPolicy, PushTime};

pub const RUN_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    NotDue,
    DueFirst,
    DueLate,
    AlreadyRan,
}

impl ScheduleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDue => "not_due",
            Self::DueFirst => "due_first",
            Self::DueLate => "due_late",
            Self::AlreadyRan => "already_ran",
        }
    }
}

/// Classifies one instant. `catch_up_minutes` is inclusive and never crosses midnight.
pub fn classify_schedule(
    minute_of_day: u32,
    today: &str,
    push_time: PushTime,
    catch_up_minutes: u32,
    last_run_date: &str,
) -> ScheduleState {
    if last_run_date == today {
        return ScheduleState::AlreadyRan;
    }
    let target = push_time.minutes_of_day();
    if minute_of_day < target {
        return ScheduleState::NotDue;
    }
    if minute_of_day - target <= catch_up_minutes {
        ScheduleState::DueFirst
    } else {
        ScheduleState::DueLate
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEvaluation {
    pub state: ScheduleState,
    pub today: String,
    pub minute_of_day: u32,
    pub at_target_minute: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What the maintenance loop does with an evaluation.
pub enum ScheduledAction {
    None,
    SendDigest,
    MarkMissed,
    SendLateDigest,
    SilentRecheck,
}

impl ScheduledAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SendDigest => "send_digest",
            Self::MarkMissed => "mark_missed",
            Self::SendLateDigest => "send_late_digest",
            Self::SilentRecheck => "silent_recheck",
        }
    }

    /// True when the action must commit today's marker before anything else.
    pub fn commits_marker(self) -> bool {
        matches!(
            self,
            Self::SendDigest | Self::MarkMissed | Self::SendLateDigest
        )
    }
}

pub fn plan_action(
    evaluation: &ScheduleEvaluation,
    missed_window_policy: MissedWindowPolicy,
    silent_recheck: bool,
) -> ScheduledAction {
    match evaluation.state {
        ScheduleState::NotDue => ScheduledAction::None,
        ScheduleState::DueFirst => ScheduledAction::SendDigest,
        ScheduleState::DueLate => match missed_window_policy {
            MissedWindowPolicy::Skip => ScheduledAction::MarkMissed,
            MissedWindowPolicy::SendLate => ScheduledAction::SendLateDigest,
        },
        ScheduleState::AlreadyRan if silent_recheck && evaluation.at_target_minute => {
            ScheduledAction::SilentRecheck
        }
        ScheduleState::AlreadyRan => ScheduledAction::None,
    }
}

#[derive(Debug, Clone, Default)]
/// Remembers the last processed local minute so repeated ticks inside one
/// minute are evaluated once.
pub struct DigestScheduler {
    last_processed: Option<(NaiveDate, u32)>,
}

impl DigestScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_processed(&self) -> Option<(NaiveDate, u32)> {
        self.last_processed
    }

    /// Returns `None` when `now_local` falls in a minute already evaluated.
    pub fn evaluate(
        &mut self,
        now_local: NaiveDateTime,
        push_time: PushTime,
        catch_up_minutes: u32,
        last_run_date: &str,
    ) -> Option<ScheduleEvaluation> {
        let date = now_local.date();
        let minute_of_day = now_local.hour() * 60 + now_local.minute();
        if self.last_processed == Some((date, minute_of_day)) {
            return None;
        }
        self.last_processed = Some((date, minute_of_day));
        let today = date.format(RUN_DATE_FORMAT).to_string();
        let state = classify_schedule(
            minute_of_day,
            &today,
            push_time,
            catch_up_minutes,
            last_run_date,
        );
        Some(ScheduleEvaluation {
            state,
            today,
            minute_of_day,
            at_target_minute: minute_of_day == push_time.minutes_of_day(),
        })
    }
}
