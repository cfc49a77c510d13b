//! Sample filter
//!
//! Turns consecutive accelerometer readings into debounced step decisions.
//! The change between two readings is measured as the sum of absolute per-axis
//! deltas; a step fires when that exceeds the threshold and the debounce
//! interval has elapsed since the previous step.
//!
//! Timestamps are local wall-clock time, the same clock the day boundaries
//! use. When the clock falls back at the end of daylight saving time, samples
//! from the repeated hour are not after the last accepted one and are dropped
//! as `Stale` until local time passes it again.

use crate::classify::state::FilterState;
use crate::types::{MotionSample, StepEvent};
use chrono::Duration;

/// Outcome of feeding one sample to the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleVerdict {
    /// Sample accepted and a step was detected
    Step(StepEvent),
    /// Sample accepted, no step
    NoStep,
    /// Missing or non-finite axes
    Malformed,
    /// Timestamp not after the last accepted sample (replay, duplicate, reordering)
    Stale,
}

/// Threshold-and-debounce step filter
#[derive(Debug, Clone)]
pub struct SampleFilter {
    threshold: f64,
    debounce: Duration,
}

impl SampleFilter {
    pub fn new(threshold: f64, debounce_ms: i64) -> Self {
        Self {
            threshold,
            debounce: Duration::milliseconds(debounce_ms),
        }
    }

    /// Classify `sample` against the cursor in `state`, advancing it when accepted
    pub fn process(&self, state: &mut FilterState, sample: &MotionSample) -> SampleVerdict {
        if let Some(last) = state.last_sample_time {
            if sample.timestamp <= last {
                return SampleVerdict::Stale;
            }
        }

        let current = match sample.acceleration() {
            Ok(acceleration) => acceleration,
            Err(e) => {
                log::trace!("Discarding sample: {}", e);
                return SampleVerdict::Malformed;
            }
        };

        let previous = state.previous.replace(current);
        state.last_sample_time = Some(sample.timestamp);

        // The first sample has nothing to diff against
        let Some(previous) = previous else {
            return SampleVerdict::NoStep;
        };

        if current.delta_magnitude(&previous) <= self.threshold {
            return SampleVerdict::NoStep;
        }

        let debounced = state
            .last_step_time
            .map(|last| sample.timestamp - last >= self.debounce)
            .unwrap_or(true);

        if !debounced {
            return SampleVerdict::NoStep;
        }

        state.last_step_time = Some(sample.timestamp);
        SampleVerdict::Step(StepEvent {
            timestamp: sample.timestamp,
        })
    }
}
