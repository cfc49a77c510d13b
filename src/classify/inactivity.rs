//! Inactivity monitor
//!
//! Converts wall-clock time elapsed since the accounting baseline into whole
//! sedentary minutes. The baseline only ever advances by the minutes it
//! accounts for, so overlapping or repeated ticks never count a minute twice
//! and a late tick recovers every minute of a gap.

use crate::classify::state::ActivityState;
use chrono::{Duration, NaiveDateTime};

/// A run of consecutive whole minutes that were just accounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteSpan {
    /// Start of the first minute
    pub start: NaiveDateTime,
    pub count: u32,
}

impl MinuteSpan {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Start instant of every minute in the span
    pub fn minute_starts(&self) -> impl Iterator<Item = NaiveDateTime> {
        let start = self.start;
        (0..self.count).map(move |i| start + Duration::minutes(i64::from(i)))
    }
}

/// Sedentary-minute accountant
#[derive(Debug, Clone, Default)]
pub struct InactivityMonitor;

impl InactivityMonitor {
    /// Account every whole minute between the baseline and `now`.
    ///
    /// A clock that moved backwards accounts nothing and leaves the baseline alone.
    pub fn account(&self, state: &mut ActivityState, now: NaiveDateTime) -> MinuteSpan {
        let start = state.accounted_until;
        let elapsed = now - start;
        let minutes = elapsed.num_minutes().clamp(0, i64::from(u32::MAX)) as u32;

        if minutes > 0 {
            state.sedentary_minutes = state.sedentary_minutes.saturating_add(minutes);
            state.accounted_until = start + Duration::minutes(i64::from(minutes));
        }

        MinuteSpan {
            start,
            count: minutes,
        }
    }

    /// Restart accounting at `at` after activity; the partial minute is dropped
    pub fn restart(&self, state: &mut ActivityState, at: NaiveDateTime) {
        if at > state.accounted_until {
            state.accounted_until = at;
        }
    }
}
