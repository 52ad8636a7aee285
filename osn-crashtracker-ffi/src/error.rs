// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ffi::{c_char, CStr, CString};
use std::fmt::{Debug, Display, Formatter};
use std::ptr;

/// Please treat this as opaque; do not reach into it, and especially don't
/// write into it! The most relevant APIs are:
/// * `osn_Error_message`, to get the message as a C string.
/// * `osn_Error_drop`.
#[derive(PartialEq, Eq)]
#[repr(C)]
pub struct Error {
    /// A `CString` turned into a raw pointer. Null once dropped.
    message: *mut c_char,
}

impl Error {
    fn as_str(&self) -> &str {
        if self.message.is_null() {
            return "";
        }
        // Safety: non-null messages always come from `CString::into_raw` in `From<String>`.
        unsafe { CStr::from_ptr(self.message) }
            .to_str()
            .unwrap_or_default()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Error(\"{}\")", self.as_str()))
    }
}

impl std::error::Error for Error {}

impl From<String> for Error {
    fn from(value: String) -> Self {
        // Interior nuls cannot cross the boundary; cut the message there.
        let mut bytes = value.into_bytes();
        if let Some(nul) = bytes.iter().position(|b| *b == 0) {
            bytes.truncate(nul);
        }
        let message = CString::new(bytes)
            .map(CString::into_raw)
            .unwrap_or(ptr::null_mut());
        Self { message }
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        // {:#} is the "alternate" format, which includes the context chain.
        Self::from(format!("{value:#}"))
    }
}

impl Drop for Error {
    fn drop(&mut self) {
        clear_error(self);
    }
}

/// Internal function to safely clear an error's contents
pub fn clear_error(err: &mut Error) {
    let message = std::mem::replace(&mut err.message, ptr::null_mut());
    if !message.is_null() {
        // Safety: see `Error::as_str`. The pointer was swapped out, so it is freed only once.
        drop(unsafe { CString::from_raw(message) });
    }
}

/// Drops the error. It should not be used after this, though the
/// implementation tries to limit the damage in the case of use-after-free and
/// double-free scenarios.
///
/// # Safety
///
/// Only pass null or a pointer to a valid, mutable `osn_Error`.
#[no_mangle]
pub unsafe extern "C" fn osn_Error_drop(error: Option<&mut Error>) {
    if let Some(err) = error {
        clear_error(err);
    }
}

/// Returns the error's message as a nul-terminated string, valid until the error is dropped.
/// Returns null for a null or already dropped error.
///
/// # Safety
/// Only pass null or a valid reference to an `osn_Error`.
#[no_mangle]
pub unsafe extern "C" fn osn_Error_message(error: Option<&Error>) -> *const c_char {
    error.map_or(ptr::null(), |err| err.message)
}

/// A generic result type for when an operation may fail,
/// but there's nothing to return in the case of success.
#[repr(C)]
#[derive(Debug)]
pub enum VoidResult {
    Ok,
    Err(Error),
}

impl VoidResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, VoidResult::Ok)
    }
}

impl From<anyhow::Result<()>> for VoidResult {
    fn from(value: anyhow::Result<()>) -> Self {
        match value {
            Ok(_) => Self::Ok,
            Err(err) => Self::Err(err.into()),
        }
    }
}

/// Turns a panic caught at the boundary into an error naming the function.
pub fn handle_panic_error(
    error: Box<dyn std::any::Any + Send + 'static>,
    function_name: &str,
) -> Error {
    let text = if let Some(s) = error.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = error.downcast_ref::<&str>() {
        s
    } else {
        "Unable to retrieve panic context"
    };
    Error::from(format!("{function_name} failed: (panic) {text}"))
}

/// Wraps a C-FFI function in standard form: the body's errors get the function name as context,
/// and panics become errors instead of crossing the boundary.
/// Requires `#[named]` from the `function_name` crate on the enclosing function.
#[macro_export]
macro_rules! wrap_with_void_ffi_result {
    ($body:block) => {{
        use anyhow::Context;
        use std::panic::{catch_unwind, AssertUnwindSafe};

        catch_unwind(AssertUnwindSafe(|| -> $crate::VoidResult {
            (|| {
                $body;
                anyhow::Ok(())
            })()
            .context(concat!(function_name!(), " failed"))
            .into()
        }))
        .unwrap_or_else(|e| $crate::VoidResult::Err($crate::handle_panic_error(e, function_name!())))
    }};
}

/// Reads a borrowed, nul-terminated UTF-8 string. Null reads as the empty string.
///
/// # Safety
/// `ptr` must be null or point to a valid nul-terminated string.
pub(crate) unsafe fn str_from_ptr<'a>(ptr: *const c_char, what: &str) -> anyhow::Result<&'a str> {
    if ptr.is_null() {
        return Ok("");
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| anyhow::anyhow!("{what} is not valid UTF-8: {e}"))
}
