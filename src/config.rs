//! Tracker configuration
//!
//! One canonical parameter set for step detection, sleep classification and the
//! daily trigger cycle. Every field defaults from the named constants below, so a
//! partial JSON file only needs to mention what it overrides.

use crate::classify::SleepWindow;
use crate::error::TrackerError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Magnitude (sum of absolute per-axis deltas) a sample must exceed to count as a step
pub const DEFAULT_STEP_THRESHOLD: f64 = 1.2;

/// Minimum spacing between two detected steps (milliseconds)
pub const DEFAULT_DEBOUNCE_MS: i64 = 300;

/// Distance credited per step (meters)
pub const DEFAULT_STRIDE_LENGTH_M: f64 = 0.5;

/// Minimum continuous in-window inactivity that is committed as sleep (minutes)
pub const DEFAULT_SLEEP_THRESHOLD_MINUTES: u32 = 180;

/// Nightly sleep window, start inclusive (hour, minute)
pub const DEFAULT_SLEEP_WINDOW_START: (u32, u32) = (22, 0);

/// Nightly sleep window, end exclusive (hour, minute)
pub const DEFAULT_SLEEP_WINDOW_END: (u32, u32) = (10, 0);

/// Meal reminder notification time (hour, minute)
pub const MEAL_REMINDER_TIME: (u32, u32) = (21, 45);

/// Daily commit time (hour, minute)
pub const DAILY_COMMIT_TIME: (u32, u32) = (23, 55);

/// Deferred re-commit time (hour, minute, second)
pub const DAILY_RECOMMIT_TIME: (u32, u32, u32) = (23, 59, 30);

/// Daily counter reset time (hour, minute)
pub const DAILY_RESET_TIME: (u32, u32) = (0, 0);

pub(crate) fn hms(hour: u32, minute: u32, second: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, second).unwrap_or(NaiveTime::MIN)
}

/// Which profile is written into each committed daily record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSnapshotMode {
    /// Use the most recently saved profile
    #[default]
    Latest,
    /// Keep using the profile captured at onboarding, ignoring later edits
    FrozenAtFirstCapture,
}

/// Local times of the once-per-day triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub reminder_time: NaiveTime,
    pub commit_time: NaiveTime,
    /// Second commit of the same day so a late meal entry still lands; `None` disables it
    pub recommit_time: Option<NaiveTime>,
    pub reset_time: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let (rh, rm) = MEAL_REMINDER_TIME;
        let (ch, cm) = DAILY_COMMIT_TIME;
        let (dh, dm, ds) = DAILY_RECOMMIT_TIME;
        let (xh, xm) = DAILY_RESET_TIME;
        Self {
            reminder_time: hms(rh, rm, 0),
            commit_time: hms(ch, cm, 0),
            recommit_time: Some(hms(dh, dm, ds)),
            reset_time: hms(xh, xm, 0),
        }
    }
}

/// Full tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub step_threshold: f64,
    pub debounce_ms: i64,
    pub stride_length_m: f64,
    pub sleep_window: SleepWindow,
    pub sleep_threshold_minutes: u32,
    pub schedule: ScheduleConfig,
    pub profile_mode: ProfileSnapshotMode,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let (sh, sm) = DEFAULT_SLEEP_WINDOW_START;
        let (eh, em) = DEFAULT_SLEEP_WINDOW_END;
        Self {
            step_threshold: DEFAULT_STEP_THRESHOLD,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            stride_length_m: DEFAULT_STRIDE_LENGTH_M,
            sleep_window: SleepWindow::new(hms(sh, sm, 0), hms(eh, em, 0)),
            sleep_threshold_minutes: DEFAULT_SLEEP_THRESHOLD_MINUTES,
            schedule: ScheduleConfig::default(),
            profile_mode: ProfileSnapshotMode::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, TrackerError> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, TrackerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject parameter combinations the classifier cannot work with
    pub fn validate(&self) -> Result<(), TrackerError> {
        if !self.step_threshold.is_finite() || self.step_threshold <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "step_threshold must be positive, got {}",
                self.step_threshold
            )));
        }

        if !self.stride_length_m.is_finite() || self.stride_length_m <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "stride_length_m must be positive, got {}",
                self.stride_length_m
            )));
        }

        if self.debounce_ms < 0 {
            return Err(TrackerError::InvalidConfig(format!(
                "debounce_ms must not be negative, got {}",
                self.debounce_ms
            )));
        }

        if self.sleep_window.start == self.sleep_window.end {
            return Err(TrackerError::InvalidConfig(
                "sleep_window start and end must differ".to_string(),
            ));
        }

        if self.sleep_threshold_minutes == 0 {
            return Err(TrackerError::InvalidConfig(
                "sleep_threshold_minutes must be at least 1".to_string(),
            ));
        }

        if let Some(recommit) = self.schedule.recommit_time {
            if recommit <= self.schedule.commit_time {
                return Err(TrackerError::InvalidConfig(format!(
                    "recommit_time {} must be after commit_time {}",
                    recommit, self.schedule.commit_time
                )));
            }
        }

        // The day opens at the reset and closes at the commit
        if self.schedule.reset_time >= self.schedule.commit_time {
            return Err(TrackerError::InvalidConfig(format!(
                "reset_time {} must be before commit_time {}",
                self.schedule.reset_time, self.schedule.commit_time
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.step_threshold, 1.2);
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.sleep_threshold_minutes, 180);
        assert_eq!(config.schedule.reminder_time, hms(21, 45, 0));
        assert_eq!(config.schedule.commit_time, hms(23, 55, 0));
        assert_eq!(config.schedule.recommit_time, Some(hms(23, 59, 30)));
        assert_eq!(config.schedule.reset_time, hms(0, 0, 0));
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = TrackerConfig::from_json(
            r#"{
                "stride_length_m": 0.8,
                "schedule": { "reminder_time": "18:30:00" },
                "profile_mode": "frozen_at_first_capture"
            }"#,
        )
        .unwrap();

        assert_eq!(config.stride_length_m, 0.8);
        assert_eq!(config.schedule.reminder_time, hms(18, 30, 0));
        assert_eq!(config.schedule.commit_time, hms(23, 55, 0));
        assert_eq!(config.profile_mode, ProfileSnapshotMode::FrozenAtFirstCapture);
        assert_eq!(config.step_threshold, DEFAULT_STEP_THRESHOLD);
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = TrackerConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(TrackerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_non_positive_stride() {
        let result = TrackerConfig::from_json(r#"{ "stride_length_m": 0.0 }"#);
        assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_recommit_before_commit() {
        let mut config = TrackerConfig::default();
        config.schedule.recommit_time = Some(hms(23, 0, 0));
        assert!(config.validate().is_err());

        config.schedule.recommit_time = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_reset_after_commit() {
        let mut config = TrackerConfig::default();
        config.schedule.reset_time = hms(23, 58, 0);
        assert!(config.validate().is_err());

        config.schedule.reset_time = hms(3, 0, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_sleep_window() {
        let mut config = TrackerConfig::default();
        config.sleep_window = SleepWindow::new(hms(22, 0, 0), hms(22, 0, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "debounce_ms": 250 }"#).unwrap();

        let config = TrackerConfig::load(&path).unwrap();
        assert_eq!(config.debounce_ms, 250);
    }
}
