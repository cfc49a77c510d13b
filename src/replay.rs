//! Event replay
//!
//! Drives a tracker from a recorded NDJSON event log on a virtual clock. Each
//! line is one event tagged by `type`:
//!
//! ```text
//! {"type":"sample","timestamp":"2024-01-15T08:00:00.020","x":0.1,"y":9.8,"z":0.2}
//! {"type":"tick","timestamp":"2024-01-15T08:01:00"}
//! {"type":"meals","date":"2024-01-15","breakfast":true}
//! {"type":"profile","age":30,"height_cm":175.0,"weight_kg":70.0,"gender":"male"}
//! {"type":"sleep_start","timestamp":"2024-01-15T13:00:00"}
//! {"type":"sleep_stop","timestamp":"2024-01-15T14:00:00"}
//! ```
//!
//! Between events the replayer ticks the tracker at a fixed interval of virtual
//! time, the way the live ticker would.

use crate::clock::{Clock, ManualClock};
use crate::error::TrackerError;
use crate::tracker::ActivityTracker;
use crate::types::{MealRecord, MotionSample, UserProfile};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// One recorded input event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Sample(MotionSample),
    Tick {
        timestamp: NaiveDateTime,
    },
    Meals {
        date: NaiveDate,
        #[serde(flatten)]
        meals: MealRecord,
    },
    Profile(UserProfile),
    SleepStart {
        timestamp: NaiveDateTime,
    },
    SleepStop {
        timestamp: NaiveDateTime,
    },
}

impl ReplayEvent {
    /// Virtual time the event happens at; meal and profile entries carry none
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            ReplayEvent::Sample(sample) => Some(sample.timestamp),
            ReplayEvent::Tick { timestamp }
            | ReplayEvent::SleepStart { timestamp }
            | ReplayEvent::SleepStop { timestamp } => Some(*timestamp),
            ReplayEvent::Meals { .. } | ReplayEvent::Profile(_) => None,
        }
    }
}

/// Parse an NDJSON event log.
///
/// Blank lines are ignored; lines that fail to parse are skipped and counted.
pub fn parse_events<R: BufRead>(reader: R) -> Result<(Vec<ReplayEvent>, usize), TrackerError> {
    let mut events = Vec::new();
    let mut skipped = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<ReplayEvent>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => {
                log::warn!("Skipping line {}: {}", index + 1, e);
                skipped += 1;
            }
        }
    }

    Ok((events, skipped))
}

/// Counters for a finished replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub events: usize,
    pub samples: usize,
    pub steps: usize,
    pub ticks: usize,
    pub triggers: usize,
    pub rejected: usize,
}

/// Feeds events to a tracker on a virtual clock
pub struct Replayer {
    tracker: ActivityTracker,
    clock: ManualClock,
    tick_every: Option<Duration>,
    last_tick: NaiveDateTime,
    stats: ReplayStats,
}

impl Replayer {
    /// Start a replay at `start` with a synthetic tick every minute
    pub fn new(tracker: ActivityTracker, start: NaiveDateTime) -> Self {
        Self {
            tracker,
            clock: ManualClock::new(start),
            tick_every: Some(Duration::minutes(1)),
            last_tick: start,
            stats: ReplayStats::default(),
        }
    }

    /// Change the synthetic tick interval; `None` ticks only on `tick` events
    pub fn with_tick_every(mut self, interval: Option<Duration>) -> Self {
        self.tick_every = interval.filter(|d| *d > Duration::zero());
        self
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Apply one event, first ticking through the virtual time before it
    pub fn apply(&mut self, event: &ReplayEvent) {
        self.stats.events += 1;

        if let Some(at) = event.timestamp() {
            self.advance_to(at);
        }
        let now = self.clock.now();

        match event {
            ReplayEvent::Sample(sample) => {
                self.stats.samples += 1;
                if self.tracker.process_sample(sample).is_step() {
                    self.stats.steps += 1;
                }
            }
            ReplayEvent::Tick { .. } => self.tick(now),
            ReplayEvent::Meals { date, meals } => self.tracker.save_meals(*date, *meals),
            ReplayEvent::Profile(profile) => {
                if let Err(e) = self.tracker.set_profile(profile.clone()) {
                    log::warn!("Rejected profile: {}", e);
                    self.stats.rejected += 1;
                }
            }
            ReplayEvent::SleepStart { .. } => self.tracker.start_manual_sleep(now),
            ReplayEvent::SleepStop { .. } => {
                self.tracker.stop_manual_sleep(now);
            }
        }
    }

    /// Move the virtual clock forward, ticking on every interval boundary.
    ///
    /// The clock never moves backwards.
    pub fn advance_to(&mut self, at: NaiveDateTime) {
        if at <= self.clock.now() {
            return;
        }

        if let Some(step) = self.tick_every {
            while self.last_tick + step <= at {
                let next = self.last_tick + step;
                self.clock.set(next);
                self.tick(next);
            }
        }
        self.clock.set(at);
    }

    fn tick(&mut self, now: NaiveDateTime) {
        let report = self.tracker.tick(now);
        self.stats.ticks += 1;
        self.stats.triggers += report.fired.len();
        self.last_tick = now;
    }

    /// Flush the tracker and hand it back with the replay counters
    pub fn finish(mut self) -> (ActivityTracker, ReplayStats) {
        if let Err(e) = self.tracker.flush() {
            log::error!("Final flush failed: {}", e);
        }
        (self.tracker, self.stats)
    }
}
