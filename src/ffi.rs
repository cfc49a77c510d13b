//! FFI bindings for the RiM tracker
//!
//! C-compatible functions for embedding the tracker in a mobile shell. Strings
//! are null-terminated UTF-8; returned strings are allocated by the library and
//! must be freed with `rim_free_string`. Timestamps are local
//! `YYYY-MM-DDTHH:MM:SS` or RFC 3339; passing NULL uses the system clock.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int};
use std::path::PathBuf;
use std::ptr;

use chrono::{NaiveDate, NaiveDateTime};

use crate::clock::{parse_local_time, Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::tracker::ActivityTracker;
use crate::types::{MealRecord, MotionSample, UserProfile};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Resolve an optional timestamp argument, falling back to the system clock
unsafe fn time_or_now(now: *const c_char) -> Result<NaiveDateTime, String> {
    if now.is_null() {
        return Ok(SystemClock.now());
    }
    let text = cstr_to_string(now).ok_or_else(|| "Invalid timestamp string".to_string())?;
    parse_local_time(&text).map_err(|e| e.to_string())
}

/// Opaque handle to an ActivityTracker
pub struct RimTrackerHandle {
    tracker: ActivityTracker,
}

/// Borrow the tracker behind a handle, recording an error for NULL
unsafe fn tracker_mut<'a>(handle: *mut RimTrackerHandle) -> Option<&'a mut ActivityTracker> {
    if handle.is_null() {
        set_last_error("Null tracker pointer");
        return None;
    }
    Some(&mut (*handle).tracker)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Open a tracker persisting into `data_dir`.
///
/// # Safety
/// - `data_dir` must be a valid null-terminated C string.
/// - `config_json` and `now` may be NULL (defaults and the system clock).
/// - Returns a pointer that must be freed with `rim_tracker_free`.
/// - Returns NULL on error; call `rim_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_open(
    data_dir: *const c_char,
    config_json: *const c_char,
    now: *const c_char,
) -> *mut RimTrackerHandle {
    clear_last_error();

    let dir = match cstr_to_string(data_dir) {
        Some(s) => PathBuf::from(s),
        None => {
            set_last_error("Invalid data_dir string pointer");
            return ptr::null_mut();
        }
    };

    let config = if config_json.is_null() {
        TrackerConfig::default()
    } else {
        let parsed = cstr_to_string(config_json)
            .ok_or_else(|| "Invalid config string pointer".to_string())
            .and_then(|json| TrackerConfig::from_json(&json).map_err(|e| e.to_string()));
        match parsed {
            Ok(config) => config,
            Err(msg) => {
                set_last_error(&msg);
                return ptr::null_mut();
            }
        }
    };

    let now = match time_or_now(now) {
        Ok(t) => t,
        Err(msg) => {
            set_last_error(&msg);
            return ptr::null_mut();
        }
    };

    match ActivityTracker::open_dir(config, &dir, now) {
        Ok(tracker) => Box::into_raw(Box::new(RimTrackerHandle { tracker })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Flush and free a tracker.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_free(handle: *mut RimTrackerHandle) {
    if !handle.is_null() {
        let mut handle = Box::from_raw(handle);
        if let Err(e) = handle.tracker.flush() {
            log::error!("Final flush failed: {}", e);
        }
    }
}

// ============================================================================
// Ingestion and clock
// ============================================================================

/// Classify one sample given as JSON (`{"timestamp": ..., "x": .., "y": .., "z": ..}`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - `sample_json` must be a valid null-terminated C string.
/// - Returns 1 for a step, 0 otherwise, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_ingest(
    handle: *mut RimTrackerHandle,
    sample_json: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1;
    };

    let json = match cstr_to_string(sample_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid sample string pointer");
            return -1;
        }
    };

    match serde_json::from_str::<MotionSample>(&json) {
        Ok(sample) => c_int::from(tracker.process_sample(&sample).is_step()),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Classify a JSON array of samples.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - `samples_json` must be a valid null-terminated C string.
/// - Returns the number of steps detected, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_ingest_batch(
    handle: *mut RimTrackerHandle,
    samples_json: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1;
    };

    let json = match cstr_to_string(samples_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid samples string pointer");
            return -1;
        }
    };

    match serde_json::from_str::<Vec<MotionSample>>(&json) {
        Ok(samples) => tracker.process_samples(&samples).min(c_int::MAX as usize) as c_int,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Advance the tracker's clock.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - `now` must be a valid null-terminated C string, or NULL for the system clock.
/// - Returns the number of daily triggers fired, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_tick(
    handle: *mut RimTrackerHandle,
    now: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1;
    };

    match time_or_now(now) {
        Ok(now) => tracker.tick(now).fired.len() as c_int,
        Err(msg) => {
            set_last_error(&msg);
            -1
        }
    }
}

// ============================================================================
// User input
// ============================================================================

/// Save the meals entered for `date` (`YYYY-MM-DD`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - `date` and `meals_json` must be valid null-terminated C strings.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_save_meals(
    handle: *mut RimTrackerHandle,
    date: *const c_char,
    meals_json: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1;
    };

    let date = match cstr_to_string(date)
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
    {
        Some(d) => d,
        None => {
            set_last_error("Invalid date, expected YYYY-MM-DD");
            return -1;
        }
    };

    let json = match cstr_to_string(meals_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid meals string pointer");
            return -1;
        }
    };

    match serde_json::from_str::<MealRecord>(&json) {
        Ok(meals) => {
            tracker.save_meals(date, meals);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Save the user profile.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - `profile_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_set_profile(
    handle: *mut RimTrackerHandle,
    profile_json: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1;
    };

    let json = match cstr_to_string(profile_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid profile string pointer");
            return -1;
        }
    };

    let result = serde_json::from_str::<UserProfile>(&json)
        .map_err(|e| e.to_string())
        .and_then(|profile| tracker.set_profile(profile).map_err(|e| e.to_string()));

    match result {
        Ok(()) => 0,
        Err(msg) => {
            set_last_error(&msg);
            -1
        }
    }
}

/// Start a manual sleep session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - `now` must be a valid null-terminated C string, or NULL for the system clock.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_sleep_start(
    handle: *mut RimTrackerHandle,
    now: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1;
    };

    match time_or_now(now) {
        Ok(now) => {
            tracker.start_manual_sleep(now);
            0
        }
        Err(msg) => {
            set_last_error(&msg);
            -1
        }
    }
}

/// Stop the manual sleep session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - `now` must be a valid null-terminated C string, or NULL for the system clock.
/// - Returns the hours credited, 0 when no session was running, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_sleep_stop(
    handle: *mut RimTrackerHandle,
    now: *const c_char,
) -> c_double {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1.0;
    };

    match time_or_now(now) {
        Ok(now) => tracker.stop_manual_sleep(now).unwrap_or(0.0),
        Err(msg) => {
            set_last_error(&msg);
            -1.0
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Today's live summary as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - Returns a newly allocated string that must be freed with `rim_free_string`.
/// - Returns NULL on error; call `rim_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_summary(handle: *mut RimTrackerHandle) -> *mut c_char {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return ptr::null_mut();
    };

    match serde_json::to_string(&tracker.summary()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Refresh today's row and return the whole history ledger as CSV.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - Returns a newly allocated string that must be freed with `rim_free_string`.
/// - Returns NULL on error; call `rim_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_export_csv(handle: *mut RimTrackerHandle) -> *mut c_char {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return ptr::null_mut();
    };

    string_to_cstr(&tracker.export_history())
}

/// Write the working snapshot and pending ledger rows.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `rim_tracker_open`.
/// - Returns 0 on success, -1 on error (the data stays pending for the next flush).
#[no_mangle]
pub unsafe extern "C" fn rim_tracker_flush(handle: *mut RimTrackerHandle) -> c_int {
    clear_last_error();

    let Some(tracker) = tracker_mut(handle) else {
        return -1;
    };

    match tracker.flush() {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by a RiM function.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a RiM function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn rim_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next RiM function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn rim_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn rim_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn cstring(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    unsafe fn open(dir: &std::path::Path, now: &str) -> *mut RimTrackerHandle {
        let dir = cstring(dir.to_str().unwrap());
        let now = cstring(now);
        rim_tracker_open(dir.as_ptr(), ptr::null(), now.as_ptr())
    }

    #[test]
    fn test_ffi_tracker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();

        unsafe {
            let handle = open(dir.path(), "2024-01-15T12:00:00");
            assert!(!handle.is_null());

            let samples = cstring(
                r#"[
                    {"timestamp": "2024-01-15T12:00:00", "x": 0.0, "y": 9.8, "z": 0.0},
                    {"timestamp": "2024-01-15T12:00:01", "x": 1.0, "y": 10.5, "z": 0.5},
                    {"timestamp": "2024-01-15T12:00:02", "x": 0.0, "y": 9.8, "z": 0.0}
                ]"#,
            );
            assert_eq!(rim_tracker_ingest_batch(handle, samples.as_ptr()), 2);

            let single = cstring(r#"{"timestamp": "2024-01-15T12:00:03", "x": 1.0, "y": 10.5, "z": 0.5}"#);
            assert_eq!(rim_tracker_ingest(handle, single.as_ptr()), 1);

            let date = cstring("2024-01-15");
            let meals = cstring(r#"{"breakfast": true}"#);
            assert_eq!(rim_tracker_save_meals(handle, date.as_ptr(), meals.as_ptr()), 0);

            let profile = cstring(r#"{"age": 28, "height_cm": 180.0, "weight_kg": 75.0, "gender": "female"}"#);
            assert_eq!(rim_tracker_set_profile(handle, profile.as_ptr()), 0);

            let commit_time = cstring("2024-01-15T23:55:00");
            assert_eq!(rim_tracker_tick(handle, commit_time.as_ptr()), 2);

            let summary = rim_tracker_summary(handle);
            assert!(!summary.is_null());
            let summary_str = CStr::from_ptr(summary).to_str().unwrap();
            assert!(summary_str.contains("\"steps\":3"));
            rim_free_string(summary);

            let csv = rim_tracker_export_csv(handle);
            assert!(!csv.is_null());
            let csv_str = CStr::from_ptr(csv).to_str().unwrap();
            assert!(csv_str.starts_with("date,steps,distanceKm"));
            assert!(csv_str.contains("2024-01-15,3,"));
            assert!(csv_str.trim_end().ends_with(",1,0,0,28,180,75,0"));
            rim_free_string(csv);

            rim_tracker_free(handle);
        }

        assert!(dir.path().join("history.csv").exists());
    }

    #[test]
    fn test_ffi_manual_sleep() {
        let dir = tempfile::tempdir().unwrap();

        unsafe {
            let handle = open(dir.path(), "2024-01-15T13:00:00");
            let start = cstring("2024-01-15T13:00:00");
            let stop = cstring("2024-01-15T15:00:00");

            assert_eq!(rim_tracker_sleep_stop(handle, stop.as_ptr()), 0.0);
            assert_eq!(rim_tracker_sleep_start(handle, start.as_ptr()), 0);
            assert_eq!(rim_tracker_sleep_stop(handle, stop.as_ptr()), 2.0);
            assert_eq!(rim_tracker_flush(handle), 0);

            rim_tracker_free(handle);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let dir = tempfile::tempdir().unwrap();

        unsafe {
            let handle = open(dir.path(), "2024-01-15T12:00:00");

            let invalid = cstring("not json");
            assert_eq!(rim_tracker_ingest(handle, invalid.as_ptr()), -1);

            let error = rim_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let bad_time = cstring("tomorrow-ish");
            assert_eq!(rim_tracker_tick(handle, bad_time.as_ptr()), -1);

            assert_eq!(rim_tracker_ingest(ptr::null_mut(), invalid.as_ptr()), -1);

            rim_tracker_free(handle);
        }
    }

    #[test]
    fn test_ffi_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        unsafe {
            let dir_c = cstring(dir.path().to_str().unwrap());
            let config = cstring(r#"{"stride_length_m": -1.0}"#);
            let handle = rim_tracker_open(dir_c.as_ptr(), config.as_ptr(), ptr::null());

            assert!(handle.is_null());
            let error_str = CStr::from_ptr(rim_last_error()).to_str().unwrap();
            assert!(error_str.contains("stride_length_m"));
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = rim_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
