//! Collaborator interfaces
//!
//! Seams to the host application: reminder delivery and meal entry lookup.

use crate::error::TrackerError;
use crate::storage::{keys, load_value, KeyValueStore};
use crate::types::MealRecord;
use chrono::NaiveDate;

/// Delivers the evening meal reminder.
///
/// Delivery is fire-and-forget; an error is logged by the tracker and never
/// affects the daily cycle.
pub trait Notifier: Send {
    fn present_reminder(&self, date: NaiveDate) -> Result<(), TrackerError>;
}

/// Notifier that only writes the reminder to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn present_reminder(&self, date: NaiveDate) -> Result<(), TrackerError> {
        log::info!("Meal reminder for {}: log breakfast, lunch and dinner", date);
        Ok(())
    }
}

/// Supplies the meals entered for a date
pub trait MealSource: Send {
    /// `None` when nothing was entered for `date`
    fn meals_for(&self, date: NaiveDate) -> Option<MealRecord>;
}

/// Meal entries saved in the tracker's key-value store
pub struct StoredMeals<'a>(pub &'a dyn KeyValueStore);

impl MealSource for StoredMeals<'_> {
    fn meals_for(&self, date: NaiveDate) -> Option<MealRecord> {
        load_value(self.0, &keys::meals(date))
    }
}
