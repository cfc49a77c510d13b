//! Working activity state
//!
//! `ActivityState` is the single mutable record the classification pipeline
//! owns. Every component reads its parameters from configuration and mutates
//! only this struct, so the whole state can be snapshotted to storage and
//! restored after a restart.

use crate::types::{Acceleration, ActivitySummary};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// An open chunk of continuous in-window inactivity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepCandidate {
    pub active: bool,
    pub minutes_accrued: u32,
}

impl SleepCandidate {
    pub(crate) fn open(&mut self) {
        if !self.active {
            self.active = true;
            self.minutes_accrued = 0;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.active = false;
        self.minutes_accrued = 0;
    }
}

/// Sample filter cursor, persisted so replays after a restart are still rejected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    /// Last accepted (well-formed) sample
    pub previous: Option<Acceleration>,
    /// Timestamp of the last accepted sample
    pub last_sample_time: Option<NaiveDateTime>,
    /// Timestamp of the last detected step, for debouncing
    pub last_step_time: Option<NaiveDateTime>,
}

/// Per-device activity counters for one calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityState {
    /// Calendar date the counters belong to
    pub date: NaiveDate,
    pub step_count: u64,
    pub last_activity_time: NaiveDateTime,
    /// Inactivity accounted up to this instant
    pub accounted_until: NaiveDateTime,
    pub sedentary_minutes: u32,
    pub sleep_candidate: SleepCandidate,
    pub sleep_hours_committed: f64,
    /// Start of a manually started sleep session, if one is running
    #[serde(default)]
    pub manual_sleep_start: Option<NaiveDateTime>,
    #[serde(default)]
    pub filter: FilterState,
}

impl ActivityState {
    /// Fresh state for the date of `now`
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            date: now.date(),
            step_count: 0,
            last_activity_time: now,
            accounted_until: now,
            sedentary_minutes: 0,
            sleep_candidate: SleepCandidate::default(),
            sleep_hours_committed: 0.0,
            manual_sleep_start: None,
            filter: FilterState::default(),
        }
    }

    /// Distance walked today, always `step_count × stride`
    pub fn distance_meters(&self, stride_length_m: f64) -> f64 {
        self.step_count as f64 * stride_length_m
    }

    pub fn sedentary_hours(&self) -> f64 {
        self.sedentary_minutes as f64 / 60.0
    }

    /// Zero the daily counters and move the state to the date of `now`.
    ///
    /// The inactivity baseline and filter cursor carry over so minutes and
    /// samples already consumed are not counted again on the new day.
    pub fn reset_for(&mut self, now: NaiveDateTime) {
        self.date = now.date();
        self.step_count = 0;
        self.sedentary_minutes = 0;
        self.sleep_candidate.clear();
        self.sleep_hours_committed = 0.0;
    }

    pub fn summary(&self, stride_length_m: f64) -> ActivitySummary {
        ActivitySummary {
            date: self.date,
            steps: self.step_count,
            distance_km: self.distance_meters(stride_length_m) / 1000.0,
            sedentary_minutes: self.sedentary_minutes,
            sleep_hours: self.sleep_hours_committed,
            sleep_candidate_minutes: self.sleep_candidate.minutes_accrued,
            last_activity_time: self.last_activity_time,
            manual_sleep_active: self.manual_sleep_start.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_candidate_open_and_clear_keep_invariant() {
        let mut candidate = SleepCandidate::default();
        candidate.open();
        candidate.minutes_accrued = 12;
        candidate.open();
        assert_eq!(candidate.minutes_accrued, 12);

        candidate.clear();
        assert!(!candidate.active);
        assert_eq!(candidate.minutes_accrued, 0);
    }

    #[test]
    fn test_distance_is_exact_multiple_of_stride() {
        let mut state = ActivityState::new(at(8, 0));
        state.step_count = 7;
        assert_eq!(state.distance_meters(0.5), 3.5);
    }

    #[test]
    fn test_reset_keeps_baseline() {
        let mut state = ActivityState::new(at(8, 0));
        state.step_count = 100;
        state.sedentary_minutes = 40;
        state.sleep_hours_committed = 3.5;
        state.sleep_candidate.open();
        state.accounted_until = at(23, 59);

        let next_day = at(23, 59) + chrono::Duration::minutes(1);
        state.reset_for(next_day);

        assert_eq!(state.date, next_day.date());
        assert_eq!(state.step_count, 0);
        assert_eq!(state.sedentary_minutes, 0);
        assert_eq!(state.sleep_hours_committed, 0.0);
        assert!(!state.sleep_candidate.active);
        assert_eq!(state.accounted_until, at(23, 59));
    }
}
