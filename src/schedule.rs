//! Day boundary scheduler
//!
//! Decides which once-per-day triggers are due on a tick. Each trigger fires on
//! the first tick at or after its time whose date has not fired yet, so coarse
//! ticks, missed minutes and restarts neither skip nor repeat a trigger as long
//! as the guards are persisted with the state.

use crate::config::ScheduleConfig;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The daily triggers, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Reminder,
    Commit,
    Recommit,
    Reset,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerKind::Reminder => "reminder",
            TriggerKind::Commit => "commit",
            TriggerKind::Recommit => "recommit",
            TriggerKind::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// A trigger due now, keyed by the calendar date it acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTrigger {
    pub kind: TriggerKind,
    pub date: NaiveDate,
}

/// Last date each trigger fired for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerGuards {
    pub reminder: Option<NaiveDate>,
    pub commit: Option<NaiveDate>,
    pub recommit: Option<NaiveDate>,
    pub reset: Option<NaiveDate>,
}

impl TriggerGuards {
    /// Guards for a tracker created on `today`; its counters already belong to today
    pub fn new(today: NaiveDate) -> Self {
        Self {
            reset: Some(today),
            ..Self::default()
        }
    }

    pub fn last_fired(&self, kind: TriggerKind) -> Option<NaiveDate> {
        match kind {
            TriggerKind::Reminder => self.reminder,
            TriggerKind::Commit => self.commit,
            TriggerKind::Recommit => self.recommit,
            TriggerKind::Reset => self.reset,
        }
    }

    /// Whether `kind` has not fired for `date` (or any later date) yet
    pub fn pending_for(&self, kind: TriggerKind, date: NaiveDate) -> bool {
        self.last_fired(kind).map_or(true, |fired| fired < date)
    }

    /// Record that `kind` fired for `date`; guards never move backwards
    pub fn mark(&mut self, kind: TriggerKind, date: NaiveDate) {
        let slot = match kind {
            TriggerKind::Reminder => &mut self.reminder,
            TriggerKind::Commit => &mut self.commit,
            TriggerKind::Recommit => &mut self.recommit,
            TriggerKind::Reset => &mut self.reset,
        };
        if slot.map_or(true, |fired| fired < date) {
            *slot = Some(date);
        }
    }
}

/// Evaluates the daily schedule against the clock
#[derive(Debug, Clone)]
pub struct DayScheduler {
    schedule: ScheduleConfig,
}

impl DayScheduler {
    pub fn new(schedule: ScheduleConfig) -> Self {
        Self { schedule }
    }

    /// Triggers due at `now`, in the order they must run.
    ///
    /// `state_date` is the date the live counters belong to. Once the reset
    /// time has passed, a stale day is closed first (see `rollover`). Today's
    /// reminder, commit and re-commit follow.
    pub fn due(
        &self,
        now: NaiveDateTime,
        guards: &TriggerGuards,
        state_date: NaiveDate,
    ) -> Vec<DueTrigger> {
        let today = now.date();
        let time = now.time();
        let mut due = Vec::new();

        if time >= self.schedule.reset_time {
            due.extend(self.rollover(today, guards, state_date));
        }

        if time >= self.schedule.reminder_time && guards.pending_for(TriggerKind::Reminder, today) {
            due.push(DueTrigger {
                kind: TriggerKind::Reminder,
                date: today,
            });
        }

        if time >= self.schedule.commit_time && guards.pending_for(TriggerKind::Commit, today) {
            due.push(DueTrigger {
                kind: TriggerKind::Commit,
                date: today,
            });
        }

        if let Some(recommit_time) = self.schedule.recommit_time {
            if time >= recommit_time && guards.pending_for(TriggerKind::Recommit, today) {
                due.push(DueTrigger {
                    kind: TriggerKind::Recommit,
                    date: today,
                });
            }
        }

        due
    }

    /// Triggers that close `state_date` and open `today`, whatever the time.
    ///
    /// A commit for the closed day runs if it was never committed (or never
    /// re-committed), then the reset. Empty when the counters already belong
    /// to `today`.
    pub fn rollover(
        &self,
        today: NaiveDate,
        guards: &TriggerGuards,
        state_date: NaiveDate,
    ) -> Vec<DueTrigger> {
        let mut due = Vec::new();
        if state_date >= today || !guards.pending_for(TriggerKind::Reset, today) {
            return due;
        }

        let recommit_missed = self.schedule.recommit_time.is_some()
            && guards.pending_for(TriggerKind::Recommit, state_date);
        if guards.pending_for(TriggerKind::Commit, state_date) || recommit_missed {
            due.push(DueTrigger {
                kind: TriggerKind::Commit,
                date: state_date,
            });
        }
        due.push(DueTrigger {
            kind: TriggerKind::Reset,
            date: today,
        });
        due
    }
}

impl Default for DayScheduler {
    fn default() -> Self {
        Self::new(ScheduleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, s).unwrap()
    }

    fn kinds(due: &[DueTrigger]) -> Vec<TriggerKind> {
        due.iter().map(|t| t.kind).collect()
    }

    /// Fire everything due, the way the tracker does
    fn fire(scheduler: &DayScheduler, now: NaiveDateTime, guards: &mut TriggerGuards, state_date: &mut NaiveDate) -> Vec<DueTrigger> {
        let due = scheduler.due(now, guards, *state_date);
        for trigger in &due {
            guards.mark(trigger.kind, trigger.date);
            if trigger.kind == TriggerKind::Reset {
                *state_date = trigger.date;
            }
        }
        due
    }

    #[test]
    fn test_nothing_due_during_the_day() {
        let scheduler = DayScheduler::default();
        let guards = TriggerGuards::new(day(15));
        assert!(scheduler.due(at(15, 12, 0, 0), &guards, day(15)).is_empty());
    }

    #[test]
    fn test_two_ticks_in_commit_minute_fire_once() {
        let scheduler = DayScheduler::default();
        let mut guards = TriggerGuards::new(day(15));
        guards.mark(TriggerKind::Reminder, day(15));
        let mut state_date = day(15);

        let first = fire(&scheduler, at(15, 23, 55, 0), &mut guards, &mut state_date);
        let second = fire(&scheduler, at(15, 23, 55, 30), &mut guards, &mut state_date);

        assert_eq!(kinds(&first), vec![TriggerKind::Commit]);
        assert!(second.is_empty());
    }

    #[test]
    fn test_full_evening_sequence() {
        let scheduler = DayScheduler::default();
        let mut guards = TriggerGuards::new(day(15));
        let mut state_date = day(15);

        let mut fired = Vec::new();
        let mut now = at(15, 21, 0, 0);
        while now <= at(16, 0, 1, 0) {
            fired.extend(fire(&scheduler, now, &mut guards, &mut state_date));
            now += chrono::Duration::seconds(30);
        }

        assert_eq!(
            fired,
            vec![
                DueTrigger { kind: TriggerKind::Reminder, date: day(15) },
                DueTrigger { kind: TriggerKind::Commit, date: day(15) },
                DueTrigger { kind: TriggerKind::Recommit, date: day(15) },
                DueTrigger { kind: TriggerKind::Reset, date: day(16) },
            ]
        );
        assert_eq!(state_date, day(16));
    }

    #[test]
    fn test_late_tick_fires_missed_triggers_in_order() {
        let scheduler = DayScheduler::default();
        let guards = TriggerGuards::new(day(15));

        // Process was suspended from the afternoon until just before midnight
        let due = scheduler.due(at(15, 23, 59, 45), &guards, day(15));
        assert_eq!(
            kinds(&due),
            vec![TriggerKind::Reminder, TriggerKind::Commit, TriggerKind::Recommit]
        );
    }

    #[test]
    fn test_missed_commit_runs_before_reset() {
        let scheduler = DayScheduler::default();
        let guards = TriggerGuards::new(day(15));

        let due = scheduler.due(at(16, 0, 0, 30), &guards, day(15));
        assert_eq!(
            due,
            vec![
                DueTrigger { kind: TriggerKind::Commit, date: day(15) },
                DueTrigger { kind: TriggerKind::Reset, date: day(16) },
            ]
        );
    }

    #[test]
    fn test_committed_day_resets_without_catch_up() {
        let scheduler = DayScheduler::default();
        let mut guards = TriggerGuards::new(day(15));
        guards.mark(TriggerKind::Commit, day(15));
        guards.mark(TriggerKind::Recommit, day(15));

        let due = scheduler.due(at(16, 0, 0, 0), &guards, day(15));
        assert_eq!(kinds(&due), vec![TriggerKind::Reset]);
    }

    #[test]
    fn test_restart_after_several_days_closes_stale_day_then_runs_today() {
        let scheduler = DayScheduler::default();
        let guards = TriggerGuards::new(day(15));

        let due = scheduler.due(at(18, 23, 56, 0), &guards, day(15));
        assert_eq!(
            due,
            vec![
                DueTrigger { kind: TriggerKind::Commit, date: day(15) },
                DueTrigger { kind: TriggerKind::Reset, date: day(18) },
                DueTrigger { kind: TriggerKind::Reminder, date: day(18) },
                DueTrigger { kind: TriggerKind::Commit, date: day(18) },
            ]
        );
    }

    #[test]
    fn test_guards_never_move_backwards() {
        let mut guards = TriggerGuards::default();
        guards.mark(TriggerKind::Commit, day(16));
        guards.mark(TriggerKind::Commit, day(15));
        assert_eq!(guards.commit, Some(day(16)));
        assert!(!guards.pending_for(TriggerKind::Commit, day(15)));
        assert!(guards.pending_for(TriggerKind::Commit, day(17)));
    }

    #[test]
    fn test_disabled_recommit_never_fires() {
        let mut schedule = ScheduleConfig::default();
        schedule.recommit_time = None;
        let scheduler = DayScheduler::new(schedule);
        let mut guards = TriggerGuards::new(day(15));
        guards.mark(TriggerKind::Reminder, day(15));
        guards.mark(TriggerKind::Commit, day(15));

        assert!(scheduler.due(at(15, 23, 59, 59), &guards, day(15)).is_empty());
        let due = scheduler.due(at(16, 0, 0, 0), &guards, day(15));
        assert_eq!(kinds(&due), vec![TriggerKind::Reset]);
    }

    #[test]
    fn test_rollover_ignores_reset_time() {
        let mut schedule = ScheduleConfig::default();
        schedule.reset_time = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let scheduler = DayScheduler::new(schedule);
        let mut guards = TriggerGuards::new(day(15));
        guards.mark(TriggerKind::Commit, day(15));
        guards.mark(TriggerKind::Recommit, day(15));

        // Before 03:00 the tick leaves the day open
        assert!(scheduler.due(at(16, 1, 0, 0), &guards, day(15)).is_empty());
        assert_eq!(
            scheduler.rollover(day(16), &guards, day(15)),
            vec![DueTrigger { kind: TriggerKind::Reset, date: day(16) }]
        );
        assert!(scheduler.rollover(day(16), &guards, day(16)).is_empty());
    }
}
