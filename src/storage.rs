//! Key-value persistence
//!
//! The tracker keeps its working snapshot (activity state, trigger guards,
//! profile, meal entries) in a small key-value store of JSON values. The
//! on-disk store is a single JSON object rewritten atomically on every `set`;
//! the in-memory map stays authoritative, so a failed write is simply repeated
//! by the next one.

use crate::error::TrackerError;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Well-known keys
pub mod keys {
    use chrono::NaiveDate;

    pub const ACTIVITY_STATE: &str = "activity_state";
    pub const TRIGGER_GUARDS: &str = "trigger_guards";
    pub const PROFILE: &str = "profile";
    pub const FIRST_PROFILE: &str = "profile_first_capture";
    pub const INSTANCE_ID: &str = "instance_id";

    pub const MEALS_PREFIX: &str = "meals:";

    /// Key of the meal entry for `date`
    pub fn meals(date: NaiveDate) -> String {
        format!("{}{}", MEALS_PREFIX, date.format("%Y-%m-%d"))
    }
}

/// String-keyed store of JSON values
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&mut self, key: &str, value: Value) -> Result<(), TrackerError>;

    fn remove(&mut self, key: &str) -> Result<(), TrackerError>;
}

/// Read and decode a typed value; a value that no longer decodes is treated as absent
pub fn load_value<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            log::warn!("Ignoring undecodable value for key {}: {}", key, e);
            None
        }
    }
}

/// Encode and write a typed value
pub fn save_value<T: Serialize>(
    store: &mut dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), TrackerError> {
    let encoded = serde_json::to_value(value)?;
    store.set(key, encoded)
}

/// Volatile store for tests and replays
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), TrackerError> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), TrackerError> {
        self.data.remove(key);
        Ok(())
    }
}

/// Store backed by one JSON file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: BTreeMap<String, Value>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let path = path.into();
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|k| k.as_str())
    }

    fn persist(&self) -> Result<(), TrackerError> {
        let serialized = serde_json::to_string_pretty(&self.data)?;
        write_atomic(&self.path, serialized.as_bytes())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), TrackerError> {
        self.data.insert(key.to_string(), value);
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<(), TrackerError> {
        if self.data.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

/// Write `contents` to a sibling temp file, then rename it over `path`
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), TrackerError> {
    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    fs::write(&temp_path, contents)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Dates that have a stored meal entry
pub fn meal_dates(store: &JsonFileStore) -> Vec<NaiveDate> {
    store
        .keys()
        .filter_map(|k| k.strip_prefix(keys::MEALS_PREFIX))
        .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .collect()
}
