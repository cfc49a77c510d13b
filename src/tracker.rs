//! Activity tracker
//!
//! `ActivityTracker` owns the live `ActivityState` and is the single point
//! through which every mutation flows: motion samples, clock ticks, daily
//! triggers, meal entries and profile edits. It persists a working snapshot to
//! the key-value store and committed days to the history ledger.
//!
//! Storage failures never stop tracking. The in-memory state stays
//! authoritative; a failed write is logged and repeated by the next flush.

use crate::classify::{
    ActivityState, Classifier, InactivityMonitor, SampleOutcome, SampleVerdict, SleepChunk,
};
use crate::config::{ProfileSnapshotMode, TrackerConfig};
use crate::error::TrackerError;
use crate::history::{FileLedger, HistoryStore, UpsertOutcome};
use crate::interfaces::{LogNotifier, MealSource, Notifier, StoredMeals};
use crate::schedule::{DayScheduler, DueTrigger, TriggerGuards, TriggerKind};
use crate::storage::{keys, load_value, save_value, JsonFileStore, KeyValueStore, MemoryStore};
use crate::types::{ActivitySummary, DailyRecord, MealRecord, MotionSample, UserProfile};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Key-value snapshot file inside a data directory
pub const STORE_FILE_NAME: &str = "tracker.json";

/// History ledger file inside a data directory
pub const LEDGER_FILE_NAME: &str = "history.csv";

/// What one clock tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub sedentary_added: u32,
    pub finalized: Vec<SleepChunk>,
    pub fired: Vec<DueTrigger>,
}

/// When a state change reaches storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    /// Before the call returns
    Now,
    /// On the next flush
    Deferred,
}

/// The daily activity engine
pub struct ActivityTracker {
    config: TrackerConfig,
    classifier: Classifier,
    scheduler: DayScheduler,
    state: ActivityState,
    guards: TriggerGuards,
    profile: Option<UserProfile>,
    first_profile: Option<UserProfile>,
    store: Box<dyn KeyValueStore>,
    history: HistoryStore,
    notifier: Box<dyn Notifier>,
    meal_source: Option<Box<dyn MealSource>>,
    instance_id: Uuid,
    /// Closed days whose meal entries are removed on the next flush
    expired_meals: Vec<NaiveDate>,
    dirty: bool,
}

impl ActivityTracker {
    /// Open a tracker over the given stores, restoring any saved snapshot.
    ///
    /// Without a snapshot, counters start empty on the date of `now`.
    pub fn open(
        config: TrackerConfig,
        store: Box<dyn KeyValueStore>,
        history: HistoryStore,
        now: NaiveDateTime,
    ) -> Result<Self, TrackerError> {
        config.validate()?;

        let restored: Option<ActivityState> = load_value(store.as_ref(), keys::ACTIVITY_STATE);
        let fresh = restored.is_none();
        let state = restored.unwrap_or_else(|| ActivityState::new(now));
        let guards = load_value(store.as_ref(), keys::TRIGGER_GUARDS)
            .unwrap_or_else(|| TriggerGuards::new(state.date));
        let profile = load_value(store.as_ref(), keys::PROFILE);
        let first_profile = load_value(store.as_ref(), keys::FIRST_PROFILE);
        let stored_id: Option<Uuid> = load_value(store.as_ref(), keys::INSTANCE_ID);

        let mut tracker = Self {
            classifier: Classifier::new(&config),
            scheduler: DayScheduler::new(config.schedule.clone()),
            config,
            state,
            guards,
            profile,
            first_profile,
            store,
            history,
            notifier: Box::new(LogNotifier),
            meal_source: None,
            instance_id: stored_id.unwrap_or_else(Uuid::new_v4),
            expired_meals: Vec::new(),
            dirty: fresh,
        };

        if stored_id.is_none() {
            let id = tracker.instance_id;
            if let Err(e) = save_value(tracker.store.as_mut(), keys::INSTANCE_ID, &id) {
                log::warn!("Failed to save tracker instance id: {}", e);
            }
        }

        if fresh {
            log::info!("Started tracker {} for {}", tracker.instance_id, tracker.state.date);
            tracker.persist();
        } else {
            log::info!(
                "Restored tracker {} for {} ({} steps)",
                tracker.instance_id,
                tracker.state.date,
                tracker.state.step_count
            );
        }

        Ok(tracker)
    }

    /// Open a tracker whose snapshot and ledger live in `data_dir`
    pub fn open_dir(
        config: TrackerConfig,
        data_dir: &Path,
        now: NaiveDateTime,
    ) -> Result<Self, TrackerError> {
        fs::create_dir_all(data_dir)?;
        let store = JsonFileStore::open(data_dir.join(STORE_FILE_NAME))?;
        let history = HistoryStore::open(Box::new(FileLedger::new(data_dir.join(LEDGER_FILE_NAME))))?;
        Self::open(config, Box::new(store), history, now)
    }

    /// A tracker that keeps everything in memory
    pub fn in_memory(config: TrackerConfig, now: NaiveDateTime) -> Result<Self, TrackerError> {
        Self::open(config, Box::new(MemoryStore::new()), HistoryStore::in_memory(), now)
    }

    /// Deliver meal reminders through `notifier`
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Read meals from `source` instead of the entries saved with `save_meals`
    pub fn with_meal_source(mut self, source: Box<dyn MealSource>) -> Self {
        self.meal_source = Some(source);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> &ActivityState {
        &self.state
    }

    pub fn guards(&self) -> &TriggerGuards {
        &self.guards
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Whether the working snapshot has changes not yet written
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Classify one motion sample.
    ///
    /// A sample dated after the live counters first closes their day and
    /// opens the sample's. Never writes to storage: changes only mark the
    /// snapshot dirty and stage ledger rows for the next flush.
    pub fn process_sample(&mut self, sample: &MotionSample) -> SampleOutcome {
        let mut closed = Vec::new();
        if sample.timestamp.date() > self.state.date {
            closed = self.roll_over(sample.timestamp);
        }

        let mut outcome = self.classifier.process_sample(&mut self.state, sample);

        match outcome.verdict {
            SampleVerdict::Malformed => log::debug!("Discarded malformed sample at {}", sample.timestamp),
            SampleVerdict::Stale => log::trace!("Discarded stale sample at {}", sample.timestamp),
            SampleVerdict::Step(_) | SampleVerdict::NoStep => self.dirty = true,
        }

        self.log_chunks(&outcome.finalized);
        if !closed.is_empty() {
            closed.append(&mut outcome.finalized);
            outcome.finalized = closed;
        }

        outcome
    }

    /// Close the live day and open the one `at` falls on, ahead of the reset time
    fn roll_over(&mut self, at: NaiveDateTime) -> Vec<SleepChunk> {
        let mut report = TickReport::default();
        self.account_until(self.horizon(at), &mut report);

        let due = self.scheduler.rollover(at.date(), &self.guards, self.state.date);
        if !due.is_empty() {
            log::info!("Sample at {} opens {}", at, at.date());
        }
        for trigger in due {
            self.fire(trigger, at, Write::Deferred);
        }
        report.finalized
    }

    /// Classify a batch of samples, returning the number of steps detected
    pub fn process_samples(&mut self, samples: &[MotionSample]) -> usize {
        samples
            .iter()
            .filter(|sample| self.process_sample(sample).is_step())
            .count()
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Advance the tracker to `now`: account inactivity, then run due triggers.
    ///
    /// When the counters belong to an earlier date, inactivity is first
    /// accounted only up to the end of that date so the closed day is not
    /// credited with minutes from the days after it.
    pub fn tick(&mut self, now: NaiveDateTime) -> TickReport {
        self.flush_logged();

        let mut report = TickReport::default();

        let horizon = self.horizon(now);
        self.account_until(horizon, &mut report);

        let due = self.scheduler.due(now, &self.guards, self.state.date);
        for trigger in &due {
            self.fire(*trigger, now, Write::Now);
        }
        report.fired = due;

        // Minutes past midnight wait at the horizon until the reset opens their day
        if horizon < now && self.state.date == now.date() {
            self.account_until(now, &mut report);
        }

        self.flush_logged();
        report
    }

    /// How far inactivity may be accounted onto the live counters
    fn horizon(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self.state.date.succ_opt() {
            Some(next) if self.state.date < now.date() => now.min(next.and_time(NaiveTime::MIN)),
            _ => now,
        }
    }

    fn account_until(&mut self, at: NaiveDateTime, report: &mut TickReport) {
        let outcome = self.classifier.tick(&mut self.state, at);
        if outcome.sedentary_added > 0 || !outcome.finalized.is_empty() {
            self.dirty = true;
        }
        self.log_chunks(&outcome.finalized);
        report.sedentary_added += outcome.sedentary_added;
        report.finalized.extend(outcome.finalized);
    }

    fn fire(&mut self, trigger: DueTrigger, now: NaiveDateTime, write: Write) {
        log::info!("Trigger {} fired for {}", trigger.kind, trigger.date);

        match trigger.kind {
            TriggerKind::Reminder => {
                if let Err(e) = self.notifier.present_reminder(trigger.date) {
                    log::warn!("Meal reminder for {} not delivered: {}", trigger.date, e);
                }
            }
            TriggerKind::Commit | TriggerKind::Recommit => {
                self.commit(now, write);
            }
            TriggerKind::Reset => {
                self.reset(trigger.date);
            }
        }

        self.guards.mark(trigger.kind, trigger.date);
        self.dirty = true;
        if write == Write::Now {
            self.persist();
        }
    }

    // ------------------------------------------------------------------
    // Daily cycle
    // ------------------------------------------------------------------

    /// Close the open sleep candidate and upsert the current day's record
    pub fn commit_now(&mut self, at: NaiveDateTime) -> DailyRecord {
        let record = self.commit(at, Write::Now);
        self.persist();
        record
    }

    fn commit(&mut self, at: NaiveDateTime, write: Write) -> DailyRecord {
        if let Some(chunk) = self.classifier.finalize_sleep(&mut self.state, at) {
            self.log_chunks(&[chunk]);
        }

        let record = self.current_record();
        self.write_record(&record, write);
        self.dirty = true;
        record
    }

    fn reset(&mut self, date: NaiveDate) {
        let closed = self.state.date;
        let day_start = date.and_time(NaiveTime::MIN);

        self.state.reset_for(day_start);
        // Minutes of skipped days belong to no record
        InactivityMonitor.restart(&mut self.state, day_start);

        self.expired_meals.push(closed);
        self.dirty = true;
        log::info!("Counters reset: {} closed, now tracking {}", closed, date);
    }

    /// Build the record for the current counters without touching any state
    pub fn current_record(&self) -> DailyRecord {
        DailyRecord {
            date: self.state.date,
            steps: self.state.step_count,
            distance_km: self.classifier.steps().distance_meters(&self.state) / 1000.0,
            sedentary_hours: self.state.sedentary_hours(),
            sleep_hours: self.state.sleep_hours_committed,
            meals: self.meals_for(self.state.date),
            profile: self.snapshot_profile(),
        }
    }

    fn write_record(&mut self, record: &DailyRecord, write: Write) {
        let result = match write {
            Write::Now => self.history.upsert(record),
            Write::Deferred => Ok(self.history.stage(record)),
        };
        match result {
            Ok(UpsertOutcome::Appended) => log::info!(
                "Committed {}: {} steps, {:.2} km, {:.2} h sleep",
                record.date,
                record.steps,
                record.distance_km,
                record.sleep_hours
            ),
            Ok(UpsertOutcome::Replaced) => log::info!(
                "Re-committed {}: {} steps, {:.2} km, {:.2} h sleep",
                record.date,
                record.steps,
                record.distance_km,
                record.sleep_hours
            ),
            Err(e) => log::error!("Failed to write history row for {}: {}", record.date, e),
        }
    }

    /// Refresh today's row with the live counters, then return the whole ledger
    pub fn export_history(&mut self) -> String {
        let record = self.current_record();
        self.write_record(&record, Write::Now);
        self.history.export()
    }

    // ------------------------------------------------------------------
    // User input
    // ------------------------------------------------------------------

    fn meals_for(&self, date: NaiveDate) -> MealRecord {
        let found = match &self.meal_source {
            Some(source) => source.meals_for(date),
            None => StoredMeals(self.store.as_ref()).meals_for(date),
        };
        found.unwrap_or_default()
    }

    /// Save the meals entered for `date`
    pub fn save_meals(&mut self, date: NaiveDate, meals: MealRecord) {
        if let Err(e) = save_value(self.store.as_mut(), &keys::meals(date), &meals) {
            log::warn!("Failed to save meals for {}: {}", date, e);
        }
    }

    /// Save the user profile; the first profile ever saved is kept as well
    pub fn set_profile(&mut self, profile: UserProfile) -> Result<(), TrackerError> {
        validate_profile(&profile)?;

        if self.first_profile.is_none() {
            if let Err(e) = save_value(self.store.as_mut(), keys::FIRST_PROFILE, &profile) {
                log::warn!("Failed to save first profile: {}", e);
            }
            self.first_profile = Some(profile.clone());
        }

        if let Err(e) = save_value(self.store.as_mut(), keys::PROFILE, &profile) {
            log::warn!("Failed to save profile: {}", e);
        }
        self.profile = Some(profile);
        Ok(())
    }

    fn snapshot_profile(&self) -> Option<UserProfile> {
        match self.config.profile_mode {
            ProfileSnapshotMode::Latest => self.profile.clone(),
            ProfileSnapshotMode::FrozenAtFirstCapture => {
                self.first_profile.clone().or_else(|| self.profile.clone())
            }
        }
    }

    /// Begin a manually timed sleep session; ignored when one is running
    pub fn start_manual_sleep(&mut self, at: NaiveDateTime) {
        if self.state.manual_sleep_start.is_some() {
            log::debug!("Manual sleep already running, ignoring start at {}", at);
            return;
        }
        self.state.manual_sleep_start = Some(at);
        self.dirty = true;
        self.persist();
    }

    /// End the manual session and credit its duration as sleep.
    ///
    /// Returns the hours added, or `None` when no session was running.
    pub fn stop_manual_sleep(&mut self, at: NaiveDateTime) -> Option<f64> {
        let start = self.state.manual_sleep_start.take()?;
        let hours = (at - start).num_seconds().max(0) as f64 / 3600.0;
        self.state.sleep_hours_committed += hours;
        log::info!("Manual sleep session added {:.2} h", hours);

        self.dirty = true;
        self.persist();
        Some(hours)
    }

    pub fn summary(&self) -> ActivitySummary {
        self.state.summary(self.config.stride_length_m)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the working snapshot and any pending ledger rows
    pub fn flush(&mut self) -> Result<(), TrackerError> {
        self.history.flush()?;
        while let Some(&date) = self.expired_meals.last() {
            self.store.remove(&keys::meals(date))?;
            self.expired_meals.pop();
        }
        if !self.dirty {
            return Ok(());
        }
        save_value(self.store.as_mut(), keys::ACTIVITY_STATE, &self.state)?;
        save_value(self.store.as_mut(), keys::TRIGGER_GUARDS, &self.guards)?;
        self.dirty = false;
        Ok(())
    }

    fn flush_logged(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("Snapshot flush failed, will retry: {}", e);
        }
    }

    fn persist(&mut self) {
        self.dirty = true;
        self.flush_logged();
    }

    fn log_chunks(&self, chunks: &[SleepChunk]) {
        for chunk in chunks {
            if chunk.committed {
                log::info!("Sleep chunk of {:.2} h committed at {}", chunk.hours(), chunk.ended_at);
            } else {
                log::debug!(
                    "Sleep candidate of {} min discarded at {}",
                    chunk.minutes,
                    chunk.ended_at
                );
            }
        }
    }
}

fn validate_profile(profile: &UserProfile) -> Result<(), TrackerError> {
    if profile.age == 0 || profile.age > 150 {
        return Err(TrackerError::InvalidProfile(format!("age {} out of range", profile.age)));
    }
    if !profile.height_cm.is_finite() || profile.height_cm <= 0.0 {
        return Err(TrackerError::InvalidProfile(format!(
            "height {} cm must be positive",
            profile.height_cm
        )));
    }
    if !profile.weight_kg.is_finite() || profile.weight_kg <= 0.0 {
        return Err(TrackerError::InvalidProfile(format!(
            "weight {} kg must be positive",
            profile.weight_kg
        )));
    }
    Ok(())
}
