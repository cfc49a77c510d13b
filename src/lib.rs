//! RiM Tracker - On-device activity classification and daily aggregation
//!
//! The tracker turns a stream of accelerometer samples into per-day activity
//! numbers: steps and distance, sedentary time and sleep. It runs a fixed daily
//! schedule (meal reminder → commit → recommit → reset) and keeps one row per
//! day in a CSV history ledger.
//!
//! ## Modules
//!
//! - **Classification**: sample filtering, step detection, inactivity accounting, sleep
//! - **Tracker**: the live day, persistence and the daily trigger schedule
//! - **History**: the append-or-replace CSV ledger
//! - **Service**: background ticker and flusher on tokio (feature `service`)

pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod interfaces;
pub mod replay;
pub mod schedule;
pub mod storage;
pub mod tracker;
pub mod types;

#[cfg(any(feature = "service", test))]
pub mod service;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classify::{Classifier, SampleOutcome, TickOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use error::TrackerError;
pub use history::HistoryStore;
pub use tracker::{ActivityTracker, TickReport};
pub use types::{ActivitySummary, DailyRecord, MealRecord, MotionSample, UserProfile};

/// Tracker version reported by the CLI and FFI
pub const RIM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "rim-tracker";
