//! History ledger
//!
//! The durable record of committed days: a CSV text with one header line and
//! at most one row per calendar date. Writing a date that already has a row
//! replaces that row in place; a new date is appended.

use crate::error::TrackerError;
use crate::storage::write_atomic;
use crate::types::{DailyRecord, Gender, MealRecord, UserProfile};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

/// Ledger header, written once at the top of the file
pub const LEDGER_HEADER: &str =
    "date,steps,distanceKm,sedentaryHours,sleepHours,breakfast,lunch,dinner,age,height,weight,gender";

const LEDGER_COLUMNS: usize = 12;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Where the ledger text lives
pub trait LedgerBackend: Send {
    /// Current ledger text, `None` when nothing was ever written
    fn load(&self) -> Result<Option<String>, TrackerError>;

    /// Replace the ledger text
    fn store(&mut self, contents: &str) -> Result<(), TrackerError>;
}

/// Ledger file on disk, replaced atomically on every write
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerBackend for FileLedger {
    fn load(&self) -> Result<Option<String>, TrackerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }

    fn store(&mut self, contents: &str) -> Result<(), TrackerError> {
        write_atomic(&self.path, contents.as_bytes())
    }
}

/// In-memory ledger for tests and replays
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    contents: Option<String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerBackend for MemoryLedger {
    fn load(&self) -> Result<Option<String>, TrackerError> {
        Ok(self.contents.clone())
    }

    fn store(&mut self, contents: &str) -> Result<(), TrackerError> {
        self.contents = Some(contents.to_string());
        Ok(())
    }
}

/// What an upsert did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Appended,
    Replaced,
}

/// Upsert-by-date view over a ledger backend.
///
/// Rows are held in memory; a write that fails leaves them pending and the
/// next upsert or `flush` writes them again.
pub struct HistoryStore {
    backend: Box<dyn LedgerBackend>,
    rows: Vec<String>,
    pending: bool,
}

impl HistoryStore {
    /// Open the ledger, validating its header
    pub fn open(backend: Box<dyn LedgerBackend>) -> Result<Self, TrackerError> {
        let rows = match backend.load()? {
            Some(text) => parse_rows(&text)?,
            None => Vec::new(),
        };

        Ok(Self {
            backend,
            rows,
            pending: false,
        })
    }

    /// Empty in-memory ledger
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryLedger::new()),
            rows: Vec::new(),
            pending: false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending
    }

    /// Replace the row for the record's date, or append one, and write the ledger
    pub fn upsert(&mut self, record: &DailyRecord) -> Result<UpsertOutcome, TrackerError> {
        let outcome = self.stage(record);
        self.flush()?;
        Ok(outcome)
    }

    /// Replace or append the record's row in memory; the next `flush` writes it
    pub fn stage(&mut self, record: &DailyRecord) -> UpsertOutcome {
        let row = format_row(record);
        let key = record.date.format(DATE_FORMAT).to_string();

        let outcome = match self.rows.iter().position(|r| row_date(r) == key) {
            Some(index) => {
                self.rows[index] = row;
                UpsertOutcome::Replaced
            }
            None => {
                self.rows.push(row);
                UpsertOutcome::Appended
            }
        };

        self.pending = true;
        outcome
    }

    /// Write pending rows to the backend
    pub fn flush(&mut self) -> Result<(), TrackerError> {
        if !self.pending {
            return Ok(());
        }
        let text = self.export();
        self.backend.store(&text)?;
        self.pending = false;
        Ok(())
    }

    /// The full ledger text: header plus one line per row
    pub fn export(&self) -> String {
        let mut text = String::with_capacity(LEDGER_HEADER.len() + 1 + self.rows.len() * 64);
        text.push_str(LEDGER_HEADER);
        text.push('\n');
        for row in &self.rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    /// Parse every row back into a record
    pub fn records(&self) -> Result<Vec<DailyRecord>, TrackerError> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| parse_record(row, i + 2))
            .collect()
    }

    /// The record for `date`, if one was committed
    pub fn record_for(&self, date: NaiveDate) -> Result<Option<DailyRecord>, TrackerError> {
        let key = date.format(DATE_FORMAT).to_string();
        self.rows
            .iter()
            .enumerate()
            .find(|(_, row)| row_date(row) == key)
            .map(|(i, row)| parse_record(row, i + 2))
            .transpose()
    }
}

fn row_date(row: &str) -> &str {
    row.split(',').next().unwrap_or("")
}

fn parse_rows(text: &str) -> Result<Vec<String>, TrackerError> {
    let mut lines = text.lines();

    match lines.next() {
        None => return Ok(Vec::new()),
        Some(first) if first.trim_end() == LEDGER_HEADER => {}
        Some(first) => {
            return Err(TrackerError::LedgerFormat {
                line: 1,
                reason: format!("unexpected header '{}'", first),
            })
        }
    }

    Ok(lines
        .map(|l| l.trim_end().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Format a record as one ledger row
pub fn format_row(record: &DailyRecord) -> String {
    let profile = match &record.profile {
        Some(p) => format!("{},{},{},{}", p.age, p.height_cm, p.weight_kg, p.gender.code()),
        None => ",,,".to_string(),
    };

    format!(
        "{},{},{:.2},{:.2},{:.2},{},{},{},{}",
        record.date.format(DATE_FORMAT),
        record.steps,
        record.distance_km,
        record.sedentary_hours,
        record.sleep_hours,
        u8::from(record.meals.breakfast),
        u8::from(record.meals.lunch),
        u8::from(record.meals.dinner),
        profile
    )
}

/// Parse one ledger row; `line` is the 1-based line number for error reporting
pub fn parse_record(row: &str, line: usize) -> Result<DailyRecord, TrackerError> {
    let bad = |reason: String| TrackerError::LedgerFormat { line, reason };

    let cells: Vec<&str> = row.split(',').map(str::trim).collect();
    if cells.len() != LEDGER_COLUMNS {
        return Err(bad(format!(
            "expected {} columns, found {}",
            LEDGER_COLUMNS,
            cells.len()
        )));
    }

    let date = NaiveDate::parse_from_str(cells[0], DATE_FORMAT)
        .map_err(|e| bad(format!("date '{}': {}", cells[0], e)))?;
    let steps = cells[1]
        .parse::<u64>()
        .map_err(|e| bad(format!("steps '{}': {}", cells[1], e)))?;
    let number = |i: usize| {
        cells[i]
            .parse::<f64>()
            .map_err(|e| bad(format!("column {} '{}': {}", i + 1, cells[i], e)))
    };
    let flag = |i: usize| match cells[i] {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(bad(format!("column {} '{}' is not 0 or 1", i + 1, other))),
    };

    let profile = if cells[8..].iter().all(|c| c.is_empty()) {
        None
    } else {
        let age = cells[8]
            .parse::<u32>()
            .map_err(|e| bad(format!("age '{}': {}", cells[8], e)))?;
        let gender = cells[11]
            .parse::<u8>()
            .ok()
            .and_then(Gender::from_code)
            .ok_or_else(|| bad(format!("gender '{}'", cells[11])))?;
        Some(UserProfile {
            age,
            height_cm: number(9)?,
            weight_kg: number(10)?,
            gender,
        })
    };

    Ok(DailyRecord {
        date,
        steps,
        distance_km: number(2)?,
        sedentary_hours: number(3)?,
        sleep_hours: number(4)?,
        meals: MealRecord {
            breakfast: flag(5)?,
            lunch: flag(6)?,
            dinner: flag(7)?,
        },
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(day: u32, steps: u64) -> DailyRecord {
        DailyRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            steps,
            distance_km: steps as f64 * 0.5 / 1000.0,
            sedentary_hours: 10.25,
            sleep_hours: 4.0,
            meals: MealRecord {
                breakfast: true,
                lunch: false,
                dinner: true,
            },
            profile: Some(UserProfile {
                age: 30,
                height_cm: 175.0,
                weight_kg: 70.5,
                gender: Gender::Female,
            }),
        }
    }

    #[test]
    fn test_row_format() {
        assert_eq!(
            format_row(&record(15, 20)),
            "2024-01-15,20,0.01,10.25,4.00,1,0,1,30,175,70.5,0"
        );

        let mut anonymous = record(15, 0);
        anonymous.profile = None;
        assert_eq!(
            format_row(&anonymous),
            "2024-01-15,0,0.00,10.25,4.00,1,0,1,,,,"
        );
    }

    #[test]
    fn test_first_write_adds_header() {
        let mut history = HistoryStore::in_memory();
        history.upsert(&record(15, 20)).unwrap();

        assert_eq!(
            history.export(),
            format!("{}\n2024-01-15,20,0.01,10.25,4.00,1,0,1,30,175,70.5,0\n", LEDGER_HEADER)
        );
    }

    #[test]
    fn test_upsert_replaces_same_date_in_place() {
        let mut history = HistoryStore::in_memory();
        history.upsert(&record(14, 100)).unwrap();
        history.upsert(&record(15, 10)).unwrap();
        history.upsert(&record(16, 20)).unwrap();

        let outcome = history.upsert(&record(15, 999)).unwrap();

        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert_eq!(history.len(), 3);
        let steps: Vec<u64> = history.records().unwrap().iter().map(|r| r.steps).collect();
        assert_eq!(steps, vec![100, 999, 20]);
    }

    #[test]
    fn test_new_date_appends_and_header_appears_once() {
        let mut history = HistoryStore::in_memory();
        assert_eq!(history.upsert(&record(15, 10)).unwrap(), UpsertOutcome::Appended);
        assert_eq!(history.upsert(&record(16, 20)).unwrap(), UpsertOutcome::Appended);

        let text = history.export();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(text.matches(LEDGER_HEADER).count(), 1);
    }

    #[test]
    fn test_rows_parse_back() {
        let mut history = HistoryStore::in_memory();
        let mut anonymous = record(16, 20);
        anonymous.profile = None;
        history.upsert(&record(15, 10)).unwrap();
        history.upsert(&anonymous).unwrap();

        let records = history.records().unwrap();
        assert_eq!(records[0].profile, record(15, 10).profile);
        assert_eq!(records[0].sleep_hours, 4.0);
        assert_eq!(records[1].profile, None);
        assert_eq!(
            history.record_for(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()).unwrap().map(|r| r.steps),
            Some(20)
        );
    }

    #[test]
    fn test_file_ledger_reopens_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        let mut history = HistoryStore::open(Box::new(FileLedger::new(&path))).unwrap();
        history.upsert(&record(15, 10)).unwrap();
        history.upsert(&record(16, 20)).unwrap();
        let written = fs::read_to_string(&path).unwrap();

        let reopened = HistoryStore::open(Box::new(FileLedger::new(&path))).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.export(), written);
    }

    #[test]
    fn test_foreign_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        fs::write(&path, "a,b,c\n1,2,3\n").unwrap();

        let result = HistoryStore::open(Box::new(FileLedger::new(&path)));
        assert!(matches!(result, Err(TrackerError::LedgerFormat { line: 1, .. })));
    }

    #[test]
    fn test_failed_write_stays_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("history.csv");

        let mut history = HistoryStore::open(Box::new(FileLedger::new(&path))).unwrap();
        assert!(history.upsert(&record(15, 10)).is_err());
        assert!(history.has_pending_write());
        assert_eq!(history.len(), 1);

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        history.flush().unwrap();
        assert!(!history.has_pending_write());
        assert!(path.exists());
    }

    #[test]
    fn test_staged_row_waits_for_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let mut history = HistoryStore::open(Box::new(FileLedger::new(&path))).unwrap();

        assert_eq!(history.stage(&record(15, 10)), UpsertOutcome::Appended);
        assert!(history.has_pending_write());
        assert!(!path.exists());

        history.flush().unwrap();
        assert!(!history.has_pending_write());
        assert_eq!(fs::read_to_string(&path).unwrap(), history.export());
    }
}
