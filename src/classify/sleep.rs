//! Sleep classifier
//!
//! A two-state machine over inactivity minutes:
//!
//! - `Awake`: no open candidate
//! - `CandidateSleep`: an open chunk of continuous in-window inactivity
//!
//! A chunk only becomes committed sleep when it is finalized with at least
//! `threshold_minutes` accrued, so sitting still for a while in the evening is
//! never mistaken for sleep.

use crate::classify::inactivity::MinuteSpan;
use crate::classify::state::ActivityState;
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Nightly time-of-day window, start inclusive and end exclusive, may wrap midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SleepWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Classifier state derived from the persisted candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    Awake,
    CandidateSleep { minutes: u32 },
}

/// A candidate chunk that was closed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepChunk {
    pub ended_at: NaiveDateTime,
    pub minutes: u32,
    /// Whether the chunk reached the threshold and was added to committed sleep
    pub committed: bool,
}

impl SleepChunk {
    pub fn hours(&self) -> f64 {
        self.minutes as f64 / 60.0
    }
}

/// Window-gated, threshold-finalized sleep detector
#[derive(Debug, Clone)]
pub struct SleepClassifier {
    window: SleepWindow,
    threshold_minutes: u32,
}

impl SleepClassifier {
    pub fn new(window: SleepWindow, threshold_minutes: u32) -> Self {
        Self {
            window,
            threshold_minutes,
        }
    }

    pub fn state(&self, state: &ActivityState) -> SleepState {
        if state.sleep_candidate.active {
            SleepState::CandidateSleep {
                minutes: state.sleep_candidate.minutes_accrued,
            }
        } else {
            SleepState::Awake
        }
    }

    /// Feed freshly accounted inactivity minutes through the state machine.
    ///
    /// Each minute is attributed to the window by its start instant. An
    /// out-of-window minute closes the open chunk; after the span, the chunk is
    /// also closed when `now` itself lies outside the window.
    pub fn observe(
        &self,
        state: &mut ActivityState,
        span: MinuteSpan,
        now: NaiveDateTime,
    ) -> Vec<SleepChunk> {
        let mut finalized = Vec::new();

        for minute_start in span.minute_starts() {
            if self.window.contains(minute_start.time()) {
                state.sleep_candidate.open();
                state.sleep_candidate.minutes_accrued += 1;
            } else if let Some(chunk) = self.finalize(state, minute_start) {
                finalized.push(chunk);
            }
        }

        if !self.window.contains(now.time()) {
            if let Some(chunk) = self.finalize(state, now) {
                finalized.push(chunk);
            }
        }

        finalized
    }

    /// Close the open chunk, committing it when it reached the threshold.
    ///
    /// Returns `None` when no chunk was open.
    pub fn finalize(&self, state: &mut ActivityState, at: NaiveDateTime) -> Option<SleepChunk> {
        if !state.sleep_candidate.active {
            return None;
        }

        let minutes = state.sleep_candidate.minutes_accrued;
        let committed = minutes >= self.threshold_minutes;
        if committed {
            state.sleep_hours_committed += minutes as f64 / 60.0;
        }
        state.sleep_candidate.clear();

        Some(SleepChunk {
            ended_at: at,
            minutes,
            committed,
        })
    }
}
