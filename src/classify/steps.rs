//! Step accumulator

use crate::classify::state::ActivityState;
use crate::types::StepEvent;

/// Applies detected steps to the activity counters
#[derive(Debug, Clone)]
pub struct StepAccumulator {
    stride_length_m: f64,
}

impl StepAccumulator {
    pub fn new(stride_length_m: f64) -> Self {
        Self { stride_length_m }
    }

    /// Count one step and mark it as the latest activity
    pub fn apply(&self, state: &mut ActivityState, event: &StepEvent) {
        state.step_count += 1;
        if event.timestamp > state.last_activity_time {
            state.last_activity_time = event.timestamp;
        }
    }

    pub fn distance_meters(&self, state: &ActivityState) -> f64 {
        state.distance_meters(self.stride_length_m)
    }
}
