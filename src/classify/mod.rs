//! Activity classification
//!
//! Classifies motion samples and elapsed wall-clock time into steps, sedentary
//! minutes and sleep. Stages:
//!
//! 1. `SampleFilter` - raw reading to debounced step decision
//! 2. `StepAccumulator` - step count and distance
//! 3. `InactivityMonitor` - whole sedentary minutes since the last activity
//! 4. `SleepClassifier` - window-gated candidate chunks finalized into sleep
//!
//! `Classifier` wires the stages together over one `ActivityState`.

pub mod filter;
pub mod inactivity;
pub mod sleep;
pub mod state;
pub mod steps;

pub use filter::{SampleFilter, SampleVerdict};
pub use inactivity::{InactivityMonitor, MinuteSpan};
pub use sleep::{SleepChunk, SleepClassifier, SleepState, SleepWindow};
pub use state::{ActivityState, FilterState, SleepCandidate};
pub use steps::StepAccumulator;

use crate::config::TrackerConfig;
use crate::types::MotionSample;
use chrono::NaiveDateTime;

/// Result of classifying one motion sample
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub verdict: SampleVerdict,
    /// Sleep chunks closed while settling inactivity up to the step
    pub finalized: Vec<SleepChunk>,
}

impl SampleOutcome {
    pub fn is_step(&self) -> bool {
        matches!(self.verdict, SampleVerdict::Step(_))
    }
}

/// Result of one clock tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub sedentary_added: u32,
    pub finalized: Vec<SleepChunk>,
}

impl TickOutcome {
    /// Whether committed sleep changed during the tick
    pub fn committed_sleep(&self) -> bool {
        self.finalized.iter().any(|chunk| chunk.committed)
    }
}

/// The classification pipeline, parameterized once from configuration
#[derive(Debug, Clone)]
pub struct Classifier {
    filter: SampleFilter,
    steps: StepAccumulator,
    inactivity: InactivityMonitor,
    sleep: SleepClassifier,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            filter: SampleFilter::new(config.step_threshold, config.debounce_ms),
            steps: StepAccumulator::new(config.stride_length_m),
            inactivity: InactivityMonitor,
            sleep: SleepClassifier::new(config.sleep_window, config.sleep_threshold_minutes),
        }
    }

    pub fn steps(&self) -> &StepAccumulator {
        &self.steps
    }

    /// Classify one sample.
    ///
    /// On a step, inactivity up to the step is settled first so no minute is
    /// lost, then the open sleep candidate is finalized and the sedentary
    /// baseline restarts at the step.
    pub fn process_sample(&self, state: &mut ActivityState, sample: &MotionSample) -> SampleOutcome {
        let verdict = self.filter.process(&mut state.filter, sample);

        let mut finalized = Vec::new();
        if let SampleVerdict::Step(event) = verdict {
            let span = self.inactivity.account(state, event.timestamp);
            finalized.extend(self.sleep.observe(state, span, event.timestamp));
            finalized.extend(self.sleep.finalize(state, event.timestamp));

            self.steps.apply(state, &event);
            self.inactivity.restart(state, event.timestamp);
        }

        SampleOutcome { verdict, finalized }
    }

    /// Account elapsed inactivity up to `now` and advance the sleep state machine
    pub fn tick(&self, state: &mut ActivityState, now: NaiveDateTime) -> TickOutcome {
        let span = self.inactivity.account(state, now);
        let finalized = self.sleep.observe(state, span, now);
        TickOutcome {
            sedentary_added: span.count,
            finalized,
        }
    }

    /// Force-close the open sleep candidate, as the daily commit does
    pub fn finalize_sleep(&self, state: &mut ActivityState, at: NaiveDateTime) -> Option<SleepChunk> {
        self.sleep.finalize(state, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn jolt(ts: NaiveDateTime, up: bool) -> MotionSample {
        if up {
            MotionSample::new(ts, 1.0, 10.5, 0.5)
        } else {
            MotionSample::new(ts, 0.0, 9.8, 0.0)
        }
    }

    #[test]
    fn test_step_mid_candidate_finalizes_with_accrued_minutes() {
        let classifier = Classifier::default();
        let mut state = ActivityState::new(at(1, 0, 0));

        // Ticks through 04:30 accrue 210 minutes
        let mut now = at(1, 1, 0);
        while now <= at(4, 30, 0) {
            classifier.tick(&mut state, now);
            now += Duration::minutes(1);
        }
        assert_eq!(state.sleep_candidate.minutes_accrued, 210);

        // A step 45 s later settles nothing more (partial minute) and closes the chunk
        classifier.process_sample(&mut state, &jolt(at(4, 30, 44), false));
        let outcome = classifier.process_sample(&mut state, &jolt(at(4, 30, 45), true));

        assert!(outcome.is_step());
        assert_eq!(outcome.finalized.len(), 1);
        assert_eq!(outcome.finalized[0].minutes, 210);
        assert_eq!(state.sleep_hours_committed, 3.5);
        assert_eq!(state.sedentary_minutes, 210);
        assert!(!state.sleep_candidate.active);
        assert_eq!(state.accounted_until, at(4, 30, 45));
    }

    #[test]
    fn test_step_settles_minutes_missed_since_last_tick() {
        let classifier = Classifier::default();
        let mut state = ActivityState::new(at(2, 0, 0));

        // No ticks at all; the step alone recovers the whole gap
        classifier.process_sample(&mut state, &jolt(at(5, 0, 0), false));
        let outcome = classifier.process_sample(&mut state, &jolt(at(5, 0, 1), true));

        assert_eq!(outcome.finalized.len(), 1);
        assert_eq!(outcome.finalized[0].minutes, 180);
        assert!(outcome.finalized[0].committed);
        assert_eq!(state.sedentary_minutes, 180);
        assert_eq!(state.step_count, 1);
    }

    #[test]
    fn test_no_minute_counted_twice_around_a_step() {
        let classifier = Classifier::default();
        let mut state = ActivityState::new(at(12, 0, 0));

        classifier.tick(&mut state, at(12, 10, 30));
        classifier.process_sample(&mut state, &jolt(at(12, 10, 40), false));
        classifier.process_sample(&mut state, &jolt(at(12, 10, 50), true));
        classifier.tick(&mut state, at(12, 11, 0));
        classifier.tick(&mut state, at(12, 11, 50));

        // 10 minutes before the step, 1 minute after it
        assert_eq!(state.sedentary_minutes, 11);
    }

    #[test]
    fn test_tick_reports_sedentary_minutes() {
        let classifier = Classifier::default();
        let mut state = ActivityState::new(at(14, 0, 0));

        let outcome = classifier.tick(&mut state, at(14, 7, 10));
        assert_eq!(outcome.sedentary_added, 7);
        assert!(outcome.finalized.is_empty());
        assert!(!outcome.committed_sleep());
    }

    #[test]
    fn test_non_step_samples_leave_counters_alone() {
        let classifier = Classifier::default();
        let mut state = ActivityState::new(at(14, 0, 0));

        let outcome = classifier.process_sample(&mut state, &jolt(at(14, 5, 0), false));
        assert_eq!(outcome.verdict, SampleVerdict::NoStep);
        assert_eq!(state.sedentary_minutes, 0);
        assert_eq!(state.accounted_until, at(14, 0, 0));
    }
}
