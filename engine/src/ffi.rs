//! FFI layer for native UI hosts.
//!
//! The diff and the mapper are pure functions, so a Swift or Kotlin list
//! view can call them directly. All data crosses the boundary as JSON
//! strings.
//!
//! # Memory Management
//!
//! - Strings returned by `listsync_*` functions are allocated by Rust
//! - Caller must free them with `listsync_string_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure
//!
//! A `null` position set inside `ok` is not an error: the batch is ambiguous
//! and the host must reload the list.

use crate::{diff, ChangeEvent, ChangeSetMapper, Entity, PositionSet};
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

/// Result wrapper for FFI responses.
#[derive(Serialize)]
#[serde(untagged)]
enum FfiResult<T: Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

/// Diff output handed to the host.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiffResult {
    changes: Vec<ChangeEvent>,
    positions: Option<PositionSet>,
}

/// Convert a Rust string to a C string pointer.
/// Caller must free with `listsync_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => {
            let fallback = FfiResult::<()>::err("string contained null bytes").to_json();
            CString::new(fallback).map_or(std::ptr::null_mut(), CString::into_raw)
        }
    }
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

unsafe fn parse_json<T: serde::de::DeserializeOwned>(
    ptr: *const c_char,
    what: &str,
) -> Result<T, String> {
    let raw = from_c_string(ptr).ok_or_else(|| format!("invalid {what} string"))?;
    serde_json::from_str(&raw).map_err(|e| format!("parse error in {what}: {e}"))
}

/// Parse an ordered list; ids must be unique within it.
unsafe fn parse_list(ptr: *const c_char, what: &str) -> Result<Vec<Entity>, String> {
    let items: Vec<Entity> = parse_json(ptr, what)?;
    let duplicate = {
        let mut seen = HashSet::with_capacity(items.len());
        items
            .iter()
            .find(|e| !seen.insert(e.id.as_str()))
            .map(|e| e.id.clone())
    };
    match duplicate {
        Some(id) => Err(format!("duplicate id {id:?} in {what}")),
        None => Ok(items),
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `listsync_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn listsync_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Diffing
// ============================================================================

/// Diff two ordered snapshots and map the result onto positions.
///
/// # Arguments
/// - `previous_json`: JSON array of Entity, the list the host shows
/// - `current_json`: JSON array of Entity, the list it should show
///
/// # Returns
/// JSON string: `{"ok": {"changes": [...], "positions": PositionSet|null}}`
/// or `{"error": "message"}`, also when either list repeats an id
///
/// # Safety
/// - Both arguments must be valid null-terminated C strings or null
/// - Caller must free the returned string with `listsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn listsync_diff(
    previous_json: *const c_char,
    current_json: *const c_char,
) -> *mut c_char {
    let previous = match parse_list(previous_json, "previous") {
        Ok(p) => p,
        Err(e) => return to_c_string(FfiResult::<()>::err(e).to_json()),
    };
    let current = match parse_list(current_json, "current") {
        Ok(c) => c,
        Err(e) => return to_c_string(FfiResult::<()>::err(e).to_json()),
    };

    let changes = diff(&previous, &current);
    let positions = ChangeSetMapper::new(previous.len(), current.len()).map(&changes);
    to_c_string(FfiResult::ok(DiffResult { changes, positions }).to_json())
}

/// Map a change batch the host already has onto positions.
///
/// # Returns
/// JSON string: `{"ok": PositionSet}`, `{"ok": null}` when the batch is
/// ambiguous, or `{"error": "message"}`
///
/// # Safety
/// - `changes_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `listsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn listsync_map_changes(
    previous_len: u64,
    current_len: u64,
    changes_json: *const c_char,
) -> *mut c_char {
    let changes: Vec<ChangeEvent> = match parse_json(changes_json, "changes") {
        Ok(c) => c,
        Err(e) => return to_c_string(FfiResult::<()>::err(e).to_json()),
    };

    let mapper = ChangeSetMapper::new(previous_len as usize, current_len as usize);
    to_c_string(FfiResult::ok(mapper.map(&changes)).to_json())
}

// ============================================================================
// Version Info
// ============================================================================

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn listsync_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

/// Get the snapshot format version.
#[no_mangle]
pub extern "C" fn listsync_snapshot_format_version() -> u32 {
    crate::SNAPSHOT_FORMAT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityPayload;
    use serde_json::json;

    fn list_json(ids: &[&str]) -> CString {
        let items: Vec<Entity> = ids
            .iter()
            .map(|id| Entity::from_payload("channels", EntityPayload::new(*id, json!({})), 0))
            .collect();
        CString::new(serde_json::to_string(&items).unwrap()).unwrap()
    }

    fn read(ptr: *mut c_char) -> serde_json::Value {
        let value = unsafe { serde_json::from_str(CStr::from_ptr(ptr).to_str().unwrap()) };
        unsafe { listsync_string_free(ptr) };
        value.unwrap()
    }

    #[test]
    fn ffi_diff_scenario() {
        let previous = list_json(&["A", "B", "C"]);
        let current = list_json(&["D", "A", "C"]);

        let result = read(unsafe { listsync_diff(previous.as_ptr(), current.as_ptr()) });

        assert_eq!(result["ok"]["positions"]["insert"], json!([0]));
        assert_eq!(result["ok"]["positions"]["remove"], json!([1]));
        assert_eq!(result["ok"]["changes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn ffi_diff_rejects_duplicate_ids() {
        let previous = list_json(&["A", "A"]);
        let current = list_json(&["A"]);

        let result = read(unsafe { listsync_diff(previous.as_ptr(), current.as_ptr()) });
        assert!(result.get("ok").is_none());
        assert!(result["error"].as_str().unwrap().contains("duplicate id"));

        let result = read(unsafe { listsync_diff(current.as_ptr(), previous.as_ptr()) });
        assert!(result["error"].as_str().unwrap().contains("current"));
    }

    #[test]
    fn ffi_map_ambiguous_batch() {
        let item = Entity::from_payload("channels", EntityPayload::new("A", json!({})), 0);
        let changes = vec![ChangeEvent::moved(item, 5, 0)];
        let changes = CString::new(serde_json::to_string(&changes).unwrap()).unwrap();

        let result = read(unsafe { listsync_map_changes(3, 3, changes.as_ptr()) });

        assert!(result.get("ok").is_some());
        assert!(result["ok"].is_null());
    }

    #[test]
    fn ffi_map_valid_batch() {
        let item = Entity::from_payload("channels", EntityPayload::new("A", json!({})), 0);
        let changes = vec![ChangeEvent::update(item, 1)];
        let changes = CString::new(serde_json::to_string(&changes).unwrap()).unwrap();

        let result = read(unsafe { listsync_map_changes(2, 2, changes.as_ptr()) });

        assert_eq!(result["ok"]["update"], json!([1]));
    }

    #[test]
    fn ffi_version() {
        unsafe {
            let version = listsync_version();
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
        assert_eq!(listsync_snapshot_format_version(), crate::SNAPSHOT_FORMAT_VERSION);
    }

    #[test]
    fn ffi_error_handling() {
        let result = read(unsafe { listsync_diff(std::ptr::null(), std::ptr::null()) });
        assert!(result["error"].as_str().unwrap().contains("previous"));

        let invalid = CString::new("not valid json").unwrap();
        let result = read(unsafe { listsync_map_changes(0, 0, invalid.as_ptr()) });
        assert!(result["error"].as_str().unwrap().contains("parse error"));
    }
}
