//! Wall-clock sources
//!
//! The tracker never reads the system time directly. Production code uses
//! `SystemClock`; replays and tests drive a `ManualClock`.

use crate::error::TrackerError;
use chrono::{DateTime, Duration, Local, NaiveDateTime};
use std::sync::Mutex;

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The device's local time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A virtual clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) -> NaiveDateTime {
        match self.now.lock() {
            Ok(mut guard) => {
                *guard += by;
                *guard
            }
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Parse a local timestamp (`2024-01-15T22:30:00`, optional fraction, `T` or
/// space separator) or an RFC 3339 instant converted to local time
pub fn parse_local_time(text: &str) -> Result<NaiveDateTime, TrackerError> {
    let text = text.trim();
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(parsed);
        }
    }

    DateTime::parse_from_rfc3339(text)
        .map(|instant| instant.with_timezone(&Local).naive_local())
        .map_err(|e| TrackerError::InvalidTime(format!("'{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        let next = clock.advance(Duration::minutes(2));
        assert_eq!(next.date(), NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(clock.now(), next);

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_parse_local_time_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(22, 30, 0)
            .unwrap();
        assert_eq!(parse_local_time("2024-01-15T22:30:00").unwrap(), expected);
        assert_eq!(parse_local_time(" 2024-01-15 22:30:00.000 ").unwrap(), expected);
        assert_eq!(parse_local_time("2024-01-15T22:30").unwrap(), expected);
        assert!(parse_local_time("2024-01-15T22:30:00+02:00").is_ok());
        assert!(matches!(
            parse_local_time("yesterday"),
            Err(TrackerError::InvalidTime(_))
        ));
    }
}
