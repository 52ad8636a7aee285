// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::str_from_ptr;
use crate::host::{FfiHost, HostCallbacks};
use crate::{wrap_with_void_ffi_result, VoidResult};
use anyhow::Context;
use function_name::named;
use osn_crashtracker::{
    handle_fatal_error, CrashSubsystem, CrashtrackerConfiguration, LogBuffer, OsHookRegistry,
};
use serde_json::{Map, Value};
use std::ffi::c_char;
use std::sync::{Arc, OnceLock};

struct Installed {
    subsystem: Arc<CrashSubsystem>,
    log: Arc<LogBuffer>,
}

static INSTALLED: OnceLock<Installed> = OnceLock::new();

fn installed() -> anyhow::Result<&'static Installed> {
    INSTALLED
        .get()
        .context("crash handling has not been initialized")
}

#[no_mangle]
#[must_use]
#[named]
/// Initialize crash handling and install the hooks enabled in the configuration.
///
/// `config_json` is a JSON object with the configuration fields; missing fields take their
/// defaults and null means an all-default configuration.
///
/// # Preconditions
///   None.
/// # Safety
///   `config_json` must be null or a valid nul-terminated string.
///   Crash-tracking functions are not reentrant.
///   No other crash-handler functions should be called concurrently.
/// # Atomicity
///   This function is not atomic. A crash during its execution may lead to
///   unexpected crash-handling behaviour. Only the first successful call installs anything.
pub unsafe extern "C" fn osn_crasht_init(
    config_json: *const c_char,
    callbacks: HostCallbacks,
) -> VoidResult {
    wrap_with_void_ffi_result!({
        anyhow::ensure!(INSTALLED.get().is_none(), "crash handling already initialized");
        let config_json = str_from_ptr(config_json, "config_json")?;
        let config: CrashtrackerConfiguration = if config_json.is_empty() {
            CrashtrackerConfiguration::default()
        } else {
            CrashtrackerConfiguration::from_json(config_json)?
        };

        let log = Arc::new(LogBuffer::default());
        let host = FfiHost::new(callbacks, log.clone());
        let subsystem = Arc::new(CrashSubsystem::new(config.clone(), Box::new(host)));
        subsystem.install(&mut OsHookRegistry::new(&config))?;
        if INSTALLED.set(Installed { subsystem, log }).is_err() {
            anyhow::bail!("crash handling already initialized");
        }
    })
}

#[no_mangle]
#[must_use]
#[named]
/// Appends one line to the host log that is attached to crash reports.
///
/// # Safety
///   `line` must be null or a valid nul-terminated string.
pub unsafe extern "C" fn osn_crasht_append_log(line: *const c_char) -> VoidResult {
    wrap_with_void_ffi_result!({
        let line = str_from_ptr(line, "line")?;
        installed()?.log.push(line);
    })
}

#[no_mangle]
/// The engine's fatal-error facility. `format` is the raw format string, used to recognise known
/// failures; `message` is the formatted text that gets reported.
///
/// Never returns: the process either exits with status 0 or aborts.
///
/// # Safety
///   Both arguments must be null or valid nul-terminated strings.
pub unsafe extern "C" fn osn_crasht_fatal_error(
    format: *const c_char,
    message: *const c_char,
) -> ! {
    let format = str_from_ptr(format, "format").unwrap_or_default();
    let message = str_from_ptr(message, "message").unwrap_or_default();
    handle_fatal_error(format, message)
}

#[no_mangle]
#[must_use]
#[named]
/// Records a breadcrumb. `attributes_json` must be null or a JSON object.
///
/// # Safety
///   Both arguments must be null or valid nul-terminated strings.
pub unsafe extern "C" fn osn_crasht_add_breadcrumb(
    message: *const c_char,
    attributes_json: *const c_char,
) -> VoidResult {
    wrap_with_void_ffi_result!({
        let message = str_from_ptr(message, "message")?;
        let attributes_json = str_from_ptr(attributes_json, "attributes_json")?;
        let attributes = if attributes_json.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str(attributes_json).context("invalid attributes")? {
                Value::Object(map) => map,
                other => anyhow::bail!("attributes must be a JSON object, got {other}"),
            }
        };
        installed()?.subsystem.add_breadcrumb(message, attributes);
    })
}

#[no_mangle]
#[must_use]
#[named]
/// Empties the breadcrumb ledger.
///
/// # Safety
///   None
pub unsafe extern "C" fn osn_crasht_clear_breadcrumbs() -> VoidResult {
    wrap_with_void_ffi_result!({
        installed()?.subsystem.clear_breadcrumbs();
    })
}

#[no_mangle]
#[must_use]
#[named]
/// Disables crash handling. Hooks stay installed but let failures take their normal course.
///
/// # Safety
///   None
/// # Atomicity
///   This function is atomic and idempotent.  Calling it multiple times is allowed.
pub unsafe extern "C" fn osn_crasht_disable() -> VoidResult {
    wrap_with_void_ffi_result!({
        installed()?.subsystem.disable();
    })
}

#[no_mangle]
#[must_use]
#[named]
/// Re-enables crash handling after [`osn_crasht_disable`].
///
/// # Safety
///   None
/// # Atomicity
///   This function is atomic and idempotent.  Calling it multiple times is allowed.
pub unsafe extern "C" fn osn_crasht_enable() -> VoidResult {
    wrap_with_void_ffi_result!({
        installed()?.subsystem.enable();
    })
}
