//! `libtdjson` engine.
//!
//! Binds the per-instance `td_json_client_*` functions. Every string crossing
//! the boundary is NUL-terminated UTF-8 JSON; returned pointers are owned by
//! the library and stay valid only until the next call on the same instance,
//! so they are copied out immediately.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString, c_char, c_double, c_void};
use std::ptr::NonNull;
use std::time::Duration;

use crate::{InvocationError, TdEngine};

#[link(name = "tdjson")]
unsafe extern "C" {
    fn td_json_client_create() -> *mut c_void;
    fn td_json_client_send(client: *mut c_void, request: *const c_char);
    fn td_json_client_receive(client: *mut c_void, timeout: c_double) -> *const c_char;
    fn td_json_client_execute(client: *mut c_void, request: *const c_char) -> *const c_char;
    fn td_json_client_destroy(client: *mut c_void);
}

/// One native TDLib instance.
pub struct TdJson {
    handle: NonNull<c_void>,
}

// SAFETY: TDLib documents send/execute as thread-safe; receive is only ever
// called from the bridge's single receive thread.
unsafe impl Send for TdJson {}
unsafe impl Sync for TdJson {}

impl TdJson {
    /// Allocate a new instance.
    pub fn create() -> Result<Self, InvocationError> {
        // SAFETY: no preconditions.
        let raw = unsafe { td_json_client_create() };
        NonNull::new(raw)
            .map(|handle| Self { handle })
            .ok_or_else(|| InvocationError::Initialization("td_json_client_create returned null".into()))
    }
}

fn to_c(text: &str) -> Result<CString, InvocationError> {
    CString::new(text).map_err(|_| InvocationError::InvalidRequest("request contains a NUL byte".into()))
}

/// Copy a library-owned string out before the next call invalidates it.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn copy_out(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

impl TdEngine for TdJson {
    fn send(&self, request: &str) -> Result<(), InvocationError> {
        let request = to_c(request)?;
        // SAFETY: handle is live until Drop; request outlives the call.
        unsafe { td_json_client_send(self.handle.as_ptr(), request.as_ptr()) };
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<String>, InvocationError> {
        // SAFETY: handle is live; the result is copied before any further call.
        Ok(unsafe { copy_out(td_json_client_receive(self.handle.as_ptr(), timeout.as_secs_f64())) })
    }

    fn execute(&self, request: &str) -> Option<String> {
        let request = to_c(request).ok()?;
        // SAFETY: as above.
        unsafe { copy_out(td_json_client_execute(self.handle.as_ptr(), request.as_ptr())) }
    }

    fn name(&self) -> &str { "tdjson" }
}

impl Drop for TdJson {
    fn drop(&mut self) {
        tracing::debug!("[tdbridge] destroying native instance");
        // SAFETY: Drop runs once; no other reference to the handle remains.
        unsafe { td_json_client_destroy(self.handle.as_ptr()) };
    }
}
