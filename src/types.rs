//! Core types for the RiM tracker
//!
//! This module defines the data that flows into the classification pipeline
//! (motion samples, meal entries, the user profile) and the records that flow
//! out of it (step events, daily records, live summaries).

use crate::error::TrackerError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A 3-axis acceleration vector (m/s², gravity included or not, sensor-specific)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Acceleration {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Sum of absolute per-axis changes from `previous`
    pub fn delta_magnitude(&self, previous: &Acceleration) -> f64 {
        (self.x - previous.x).abs() + (self.y - previous.y).abs() + (self.z - previous.z).abs()
    }
}

/// A raw accelerometer reading as pushed by the sensor collaborator.
///
/// Axes are optional because platform callbacks sometimes deliver partial
/// readings; such samples are discarded by the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// Local wall-clock time of the reading
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
}

impl MotionSample {
    /// Create a complete sample
    pub fn new(timestamp: NaiveDateTime, x: f64, y: f64, z: f64) -> Self {
        Self {
            timestamp,
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Extract the acceleration vector, rejecting missing or non-finite axes
    pub fn acceleration(&self) -> Result<Acceleration, TrackerError> {
        match (self.x, self.y, self.z) {
            (Some(x), Some(y), Some(z)) if x.is_finite() && y.is_finite() && z.is_finite() => {
                Ok(Acceleration::new(x, y, z))
            }
            (Some(_), Some(_), Some(_)) => Err(TrackerError::MalformedSample(format!(
                "non-finite axis at {}",
                self.timestamp
            ))),
            _ => Err(TrackerError::MalformedSample(format!(
                "missing axis at {}",
                self.timestamp
            ))),
        }
    }
}

/// A single detected footfall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub timestamp: NaiveDateTime,
}

/// Gender as captured at onboarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Ledger encoding: Male = 1, Female = 0
    pub fn code(&self) -> u8 {
        match self {
            Gender::Male => 1,
            Gender::Female => 0,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Gender::Male),
            0 => Some(Gender::Female),
            _ => None,
        }
    }
}

/// User details captured at onboarding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub age: u32,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub gender: Gender,
}

/// Which meals the user reported for a calendar date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealRecord {
    #[serde(default)]
    pub breakfast: bool,
    #[serde(default)]
    pub lunch: bool,
    #[serde(default)]
    pub dinner: bool,
}

/// One committed day of activity, the unit of the history ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub steps: u64,
    pub distance_km: f64,
    pub sedentary_hours: f64,
    pub sleep_hours: f64,
    pub meals: MealRecord,
    /// Profile in effect when the record was committed
    pub profile: Option<UserProfile>,
}

/// Live view of the current day, for display and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub date: NaiveDate,
    pub steps: u64,
    pub distance_km: f64,
    pub sedentary_minutes: u32,
    pub sleep_hours: f64,
    /// Minutes accrued by the open sleep candidate (not yet committed)
    pub sleep_candidate_minutes: u32,
    pub last_activity_time: NaiveDateTime,
    pub manual_sleep_active: bool,
}
