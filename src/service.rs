//! Background tracker service
//!
//! Runs an `ActivityTracker` behind one async mutex with two background tasks:
//! a ticker that drives `tick` from the clock at a fixed interval, and a
//! flusher woken after ingestion that writes the dirty snapshot. Sample
//! ingestion itself never touches storage.

use crate::classify::SampleOutcome;
use crate::clock::Clock;
use crate::error::TrackerError;
use crate::tracker::{ActivityTracker, TickReport};
use crate::types::{ActivitySummary, MealRecord, MotionSample, UserProfile};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time;

/// Default interval between clock ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

pub struct TrackerService {
    tracker: Arc<Mutex<ActivityTracker>>,
    clock: Arc<dyn Clock>,
    flush_signal: Arc<Notify>,
    tick_interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl TrackerService {
    pub fn new(tracker: ActivityTracker, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            clock,
            flush_signal: Arc::new(Notify::new()),
            tick_interval: DEFAULT_TICK_INTERVAL,
            ticker: Mutex::new(None),
            flusher: Mutex::new(None),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Shared handle to the tracker
    pub fn tracker(&self) -> Arc<Mutex<ActivityTracker>> {
        self.tracker.clone()
    }

    /// Spawn the ticker and flusher tasks, replacing any running ones
    pub async fn start(&self) {
        self.spawn_ticker().await;
        self.spawn_flusher().await;
        log::info!("Tracker service started, ticking every {:?}", self.tick_interval);
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let tracker = self.tracker.clone();
        let clock = self.clock.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            loop {
                interval.tick().await;
                let now = clock.now();
                let report = tracker.lock().await.tick(now);
                for trigger in &report.fired {
                    log::debug!("Ticker at {} ran {} for {}", now, trigger.kind, trigger.date);
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn spawn_flusher(&self) {
        let mut flusher_guard = self.flusher.lock().await;
        if let Some(handle) = flusher_guard.take() {
            handle.abort();
        }

        let tracker = self.tracker.clone();
        let signal = self.flush_signal.clone();

        let handle = tokio::spawn(async move {
            loop {
                signal.notified().await;
                let mut guard = tracker.lock().await;
                if let Err(e) = guard.flush() {
                    log::warn!("Background flush failed, will retry: {}", e);
                }
            }
        });

        *flusher_guard = Some(handle);
    }

    /// Classify one sample and schedule a background flush
    pub async fn ingest(&self, sample: MotionSample) -> SampleOutcome {
        let outcome = self.tracker.lock().await.process_sample(&sample);
        self.flush_signal.notify_one();
        outcome
    }

    /// Tick immediately with the current clock time
    pub async fn tick(&self) -> TickReport {
        let now = self.clock.now();
        self.tracker.lock().await.tick(now)
    }

    pub async fn save_meals(&self, date: NaiveDate, meals: MealRecord) {
        self.tracker.lock().await.save_meals(date, meals);
    }

    pub async fn set_profile(&self, profile: UserProfile) -> Result<(), TrackerError> {
        self.tracker.lock().await.set_profile(profile)
    }

    pub async fn start_manual_sleep(&self) {
        let now = self.clock.now();
        self.tracker.lock().await.start_manual_sleep(now);
    }

    pub async fn stop_manual_sleep(&self) -> Option<f64> {
        let now = self.clock.now();
        self.tracker.lock().await.stop_manual_sleep(now)
    }

    pub async fn summary(&self) -> ActivitySummary {
        self.tracker.lock().await.summary()
    }

    pub async fn export_history(&self) -> String {
        self.tracker.lock().await.export_history()
    }

    /// Stop the background tasks and write everything that is pending
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.flusher.lock().await.take() {
            handle.abort();
        }

        let result = self.tracker.lock().await.flush();
        match &result {
            Ok(()) => log::info!("Tracker service stopped"),
            Err(e) => log::error!("Final flush failed: {}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TrackerConfig;
    use chrono::{Duration as ChronoDuration, NaiveDateTime};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn service(clock: Arc<ManualClock>) -> TrackerService {
        let tracker = ActivityTracker::in_memory(TrackerConfig::default(), clock.now()).unwrap();
        TrackerService::new(tracker, clock).with_tick_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_ingest_is_flushed_in_background() {
        let clock = Arc::new(ManualClock::new(at(12, 0, 0)));
        let service = service(clock.clone());
        service.start().await;

        for i in 0..=6 {
            let ts = at(12, 0, 0) + ChronoDuration::seconds(i);
            let sample = if i % 2 == 1 {
                MotionSample::new(ts, 1.0, 10.5, 0.5)
            } else {
                MotionSample::new(ts, 0.0, 9.8, 0.0)
            };
            service.ingest(sample).await;
        }

        time::sleep(Duration::from_millis(100)).await;

        let tracker = service.tracker();
        assert!(!tracker.lock().await.is_dirty());
        assert_eq!(service.summary().await.steps, 6);

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ticks_follow_the_clock() {
        let clock = Arc::new(ManualClock::new(at(23, 0, 0)));
        let service = service(clock.clone());

        clock.set(at(23, 55, 0));
        let report = service.tick().await;
        assert!(!report.fired.is_empty());
        assert_eq!(service.tracker().lock().await.history().len(), 1);

        // Same minute again through the background ticker
        service.start().await;
        clock.set(at(23, 55, 30));
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.tracker().lock().await.history().len(), 1);

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_sleep_uses_clock() {
        let clock = Arc::new(ManualClock::new(at(13, 0, 0)));
        let service = service(clock.clone());

        service.start_manual_sleep().await;
        clock.advance(ChronoDuration::minutes(30));
        assert_eq!(service.stop_manual_sleep().await, Some(0.5));
        assert_eq!(service.summary().await.sleep_hours, 0.5);
    }
}
