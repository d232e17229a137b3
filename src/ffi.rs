//! FFI bindings for Synheart Breath
//!
//! This module provides C-compatible functions for driving a breathing session
//! from other languages. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `breath_free_string`.
//!
//! Time is passed in as Unix epoch milliseconds; the host owns the clock and
//! calls `breath_session_advance` from its frame or timer loop.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::engine::SessionEngine;
use crate::patterns;
use crate::report::{SessionReport, SessionSummary};
use crate::types::BreathingPattern;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
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

/// Helper to serialize a value into a C string, recording failures
fn json_to_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn epoch_ms_to_utc(now_ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(now_ms).single()
}

/// Summary and derived report returned by `breath_session_stop`
#[derive(Serialize)]
struct StopPayload {
    summary: SessionSummary,
    report: Option<SessionReport>,
}

// ============================================================================
// Session API
// ============================================================================

/// Opaque handle to a SessionEngine
pub struct BreathSessionHandle {
    engine: SessionEngine,
}

/// Resolve a handle pointer, recording an error when it is NULL
unsafe fn handle_mut<'a>(session: *mut BreathSessionHandle) -> Option<&'a mut BreathSessionHandle> {
    if session.is_null() {
        set_last_error("Null session pointer");
        return None;
    }
    Some(&mut *session)
}

/// Create a new stopped session from a JSON configuration.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a pointer to a newly allocated session.
/// - Must be freed with `breath_session_free`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_new(config_json: *const c_char) -> *mut BreathSessionHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        SessionConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match SessionConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match SessionEngine::new(&config) {
        Ok(engine) => Box::into_raw(Box::new(BreathSessionHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn breath_session_free(session: *mut BreathSessionHandle) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Start (or restart) the session at `now_ms`.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_start(session: *mut BreathSessionHandle, now_ms: i64) -> i32 {
    clear_last_error();

    let Some(handle) = handle_mut(session) else {
        return -1;
    };
    let Some(now) = epoch_ms_to_utc(now_ms) else {
        set_last_error("Timestamp out of range");
        return -1;
    };

    match handle.engine.start(now) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Stop the session at `now_ms`.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - Returns a newly allocated JSON string `{"summary": .., "report": ..}`, or
///   the JSON literal `null` if the session was not playing.
/// - The string must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_stop(session: *mut BreathSessionHandle, now_ms: i64) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle_mut(session) else {
        return ptr::null_mut();
    };
    let Some(now) = epoch_ms_to_utc(now_ms) else {
        set_last_error("Timestamp out of range");
        return ptr::null_mut();
    };

    let payload = handle.engine.stop(now).map(|summary| StopPayload {
        report: summary.report(),
        summary,
    });
    json_to_cstr(&payload)
}

/// Clear history, start metrics and start time.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
#[no_mangle]
pub unsafe extern "C" fn breath_session_reset(session: *mut BreathSessionHandle) {
    clear_last_error();

    if let Some(handle) = handle_mut(session) {
        handle.engine.reset();
    }
}

/// Fire every timer due at or before `now_ms`.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - Returns the number of timers fired, or -1 on error. A phase deadline past
///   the calendar range stops the session and reports an error.
#[no_mangle]
pub unsafe extern "C" fn breath_session_advance(session: *mut BreathSessionHandle, now_ms: i64) -> i32 {
    clear_last_error();

    let Some(handle) = handle_mut(session) else {
        return -1;
    };
    let Some(now) = epoch_ms_to_utc(now_ms) else {
        set_last_error("Timestamp out of range");
        return -1;
    };

    match handle.engine.advance_to(now) {
        Ok(fired) => i32::try_from(fired).unwrap_or(i32::MAX),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Apply a JSON configuration, starting or stopping the session on `is_playing`.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - `config_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_apply_config(
    session: *mut BreathSessionHandle,
    config_json: *const c_char,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle_mut(session) else {
        return -1;
    };
    let json = match cstr_to_string(config_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid config string pointer");
            return -1;
        }
    };
    let Some(now) = epoch_ms_to_utc(now_ms) else {
        set_last_error("Timestamp out of range");
        return -1;
    };

    let result = SessionConfig::from_json(&json)
        .and_then(|config| handle.engine.apply_config(&config, now));
    match result {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Switch to a custom pattern given as JSON.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - `pattern_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_set_pattern(
    session: *mut BreathSessionHandle,
    pattern_json: *const c_char,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle_mut(session) else {
        return -1;
    };
    let json = match cstr_to_string(pattern_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid pattern string pointer");
            return -1;
        }
    };
    let Some(now) = epoch_ms_to_utc(now_ms) else {
        set_last_error("Timestamp out of range");
        return -1;
    };

    let result = BreathingPattern::from_json(&json)
        .and_then(|pattern| handle.engine.set_pattern(pattern, now));
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Get the engine state (phase, duration, playing) as JSON.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_state(session: *mut BreathSessionHandle) -> *mut c_char {
    clear_last_error();

    match handle_mut(session) {
        Some(handle) => json_to_cstr(&handle.engine.snapshot()),
        None => ptr::null_mut(),
    }
}

/// Get the latest sample as JSON (`null` before the first sample).
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_latest_sample(session: *mut BreathSessionHandle) -> *mut c_char {
    clear_last_error();

    match handle_mut(session) {
        Some(handle) => json_to_cstr(&handle.engine.latest_sample()),
        None => ptr::null_mut(),
    }
}

/// Get the retained sample history as a JSON array, oldest first.
///
/// # Safety
/// - `session` must be a valid pointer returned by `breath_session_new`.
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_history(session: *mut BreathSessionHandle) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle_mut(session) else {
        return ptr::null_mut();
    };
    let samples: Vec<_> = handle.engine.history().iter().collect();
    json_to_cstr(&samples)
}

// ============================================================================
// Catalog
// ============================================================================

/// Get the built-in pattern catalog as a JSON array.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_patterns_json() -> *mut c_char {
    clear_last_error();
    json_to_cstr(&patterns::catalog())
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Breath functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Breath function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn breath_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Breath function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn breath_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Breath library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn breath_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    const T0_MS: i64 = 1_705_305_600_000;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        breath_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_session_lifecycle() {
        let config = CString::new(r#"{"pattern": "box", "is_adaptive": false}"#).unwrap();
        unsafe {
            let session = breath_session_new(config.as_ptr());
            assert!(!session.is_null());

            assert_eq!(breath_session_start(session, T0_MS), 0);
            // 80 samples plus one transition at 4 s
            assert_eq!(breath_session_advance(session, T0_MS + 4_000), 81);

            let state: serde_json::Value =
                serde_json::from_str(&take_string(breath_session_state(session))).unwrap();
            assert_eq!(state["phase"], "HOLD_IN");
            assert_eq!(state["phase_duration_ms"], 4000);
            assert_eq!(state["is_playing"], true);

            let history: serde_json::Value =
                serde_json::from_str(&take_string(breath_session_history(session))).unwrap();
            assert_eq!(history.as_array().unwrap().len(), 80);

            let latest = take_string(breath_session_latest_sample(session));
            assert!(latest.contains("heart_rate"));

            let stopped: serde_json::Value =
                serde_json::from_str(&take_string(breath_session_stop(session, T0_MS + 4_000)))
                    .unwrap();
            assert_eq!(stopped["summary"]["duration_seconds"], 4);
            assert!(stopped["report"]["vagal_score"].is_number());

            // Second stop is a no-op
            assert_eq!(take_string(breath_session_stop(session, T0_MS + 5_000)), "null");
            assert_eq!(breath_session_advance(session, T0_MS + 10_000), 0);

            breath_session_reset(session);
            assert_eq!(take_string(breath_session_history(session)), "[]");

            breath_session_free(session);
        }
    }

    #[test]
    fn test_ffi_default_config() {
        unsafe {
            let session = breath_session_new(ptr::null());
            assert!(!session.is_null());
            let state = take_string(breath_session_state(session));
            assert!(state.contains("\"pattern\":\"coherent\""));
            assert_eq!(take_string(breath_session_latest_sample(session)), "null");
            breath_session_free(session);
        }
    }

    #[test]
    fn test_ffi_invalid_config() {
        let config = CString::new(r#"{"simulated_stress": 4.0}"#).unwrap();
        unsafe {
            let session = breath_session_new(config.as_ptr());
            assert!(session.is_null());

            let err = breath_last_error();
            assert!(!err.is_null());
            let msg = CStr::from_ptr(err).to_str().unwrap();
            assert!(msg.contains("simulated_stress"));
        }
    }

    #[test]
    fn test_ffi_apply_config_and_custom_pattern() {
        let playing = CString::new(r#"{"pattern": "soldier", "is_playing": true}"#).unwrap();
        let custom = CString::new(
            r##"{
                "id": "box",
                "name": "Triangle",
                "description": "",
                "mechanism": "Focus",
                "color": "#ffffff",
                "timings": { "inhale": 3.0, "hold_in": 3.0, "exhale": 3.0, "hold_out": 0.0 }
            }"##,
        )
        .unwrap();
        let broken = CString::new("{}").unwrap();

        unsafe {
            let session = breath_session_new(ptr::null());
            assert_eq!(breath_session_apply_config(session, playing.as_ptr(), T0_MS), 0);
            let state = take_string(breath_session_state(session));
            assert!(state.contains("\"is_playing\":true"));

            assert_eq!(breath_session_set_pattern(session, custom.as_ptr(), T0_MS + 1_000), 0);
            breath_session_advance(session, T0_MS + 4_000);
            let state: serde_json::Value =
                serde_json::from_str(&take_string(breath_session_state(session))).unwrap();
            assert_eq!(state["phase"], "HOLD_IN");

            assert_eq!(breath_session_set_pattern(session, broken.as_ptr(), T0_MS), -1);
            assert!(!breath_last_error().is_null());

            breath_session_free(session);
        }
    }

    #[test]
    fn test_ffi_calendar_end_is_an_error() {
        let config = CString::new(r#"{"pattern": "box", "is_adaptive": false}"#).unwrap();
        let end_ms = chrono::DateTime::<chrono::Utc>::MAX_UTC.timestamp_millis();
        unsafe {
            let session = breath_session_new(config.as_ptr());
            assert_eq!(breath_session_start(session, end_ms), -1);
            let msg = CStr::from_ptr(breath_last_error()).to_str().unwrap();
            assert!(msg.contains("out of range"));
            let state = take_string(breath_session_state(session));
            assert!(state.contains("\"is_playing\":false"));

            // Starts, then runs out of calendar at the second transition
            assert_eq!(breath_session_start(session, end_ms - 10_000), 0);
            assert_eq!(breath_session_advance(session, end_ms), -1);
            assert!(!breath_last_error().is_null());
            let state = take_string(breath_session_state(session));
            assert!(state.contains("\"is_playing\":false"));
            assert_eq!(breath_session_advance(session, end_ms), 0);

            breath_session_free(session);
        }
    }

    #[test]
    fn test_ffi_rejects_unbounded_cycle() {
        let config = CString::new(r#"{"breath_cycle_secs": 1e300}"#).unwrap();
        unsafe {
            assert!(breath_session_new(config.as_ptr()).is_null());
            let msg = CStr::from_ptr(breath_last_error()).to_str().unwrap();
            assert!(msg.contains("breath_cycle_secs"));
        }
    }

    #[test]
    fn test_ffi_null_session() {
        unsafe {
            assert_eq!(breath_session_start(ptr::null_mut(), T0_MS), -1);
            assert!(breath_session_state(ptr::null_mut()).is_null());
            let msg = CStr::from_ptr(breath_last_error()).to_str().unwrap();
            assert_eq!(msg, "Null session pointer");
        }
    }

    #[test]
    fn test_ffi_patterns_json() {
        unsafe {
            let json = take_string(breath_patterns_json());
            let catalog: Vec<BreathingPattern> = serde_json::from_str(&json).unwrap();
            assert_eq!(catalog.len(), 6);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = breath_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}
