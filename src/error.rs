//! Error types for the RiM tracker

use thiserror::Error;

/// Errors that can occur while tracking, persisting or exporting activity
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed motion sample: {0}")]
    MalformedSample(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Malformed ledger row {line}: {reason}")]
    LedgerFormat { line: usize, reason: String },

    #[error("Notification failed: {0}")]
    NotificationFailed(String),
}

impl TrackerError {
    /// Whether the failure is a storage problem that a later write may recover from
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Io(_))
    }
}
