// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The OS/runtime side of the hook installer: trampolines that forward each failure source to
//! the handler registered for it.

use super::hooks::{Disposition, HookRegistry, Trigger, TriggerHandler, TriggerKind};
use crate::shared::configuration::CrashtrackerConfiguration;
use std::panic::{self, PanicHookInfo};
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr};

// Trampolines run inside signal handlers and atexit, where locks are off limits, so handlers
// live behind atomic pointers. Each is either null or a `Box::into_raw()`.
#[allow(clippy::declare_interior_mutable_const)]
const NO_HANDLER: AtomicPtr<TriggerHandler> = AtomicPtr::new(ptr::null_mut());
static HANDLERS: [AtomicPtr<TriggerHandler>; 4] = [NO_HANDLER; 4];

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync>;
static PREVIOUS_PANIC_HOOK: AtomicPtr<PanicHook> = AtomicPtr::new(ptr::null_mut());
static AT_EXIT_REGISTERED: AtomicBool = AtomicBool::new(false);
#[cfg(all(windows, feature = "collector_windows"))]
static EXCEPTION_FILTER_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Replaces the handler for `kind`.
///
/// ATOMICITY:
///     This function uses a swap on an atomic pointer. The previous handler is leaked rather than
///     dropped, since a trampoline on another thread may still be running it.
fn store_handler(kind: TriggerKind, handler: TriggerHandler) {
    let box_ptr = Box::into_raw(Box::new(handler));
    let old = HANDLERS[kind.index()].swap(box_ptr, SeqCst);
    if !old.is_null() {
        tracing::debug!(?kind, "Replaced a previously registered crash handler");
    }
}

/// Runs the handler registered for the trigger's kind. `None` if there is none.
pub(crate) fn fire(trigger: Trigger) -> Option<Disposition> {
    let handler_ptr = HANDLERS[trigger.kind().index()].load(SeqCst);
    if handler_ptr.is_null() {
        return None;
    }
    // Safety: non-null pointers only come from `Box::into_raw` in `store_handler`, and are
    // never freed.
    let handler = unsafe { &*handler_ptr };
    Some(handler(trigger))
}

/// Entry point for the media engine's fatal-error facility. `format` is the raw format string,
/// matched against the known failures; `message` is the formatted text that gets reported.
///
/// Never returns: the process either exits cleanly (known failure) or aborts.
pub fn handle_fatal_error(format: &str, message: &str) -> ! {
    let trigger = Trigger::FatalError {
        format: format.to_string(),
        message: message.to_string(),
    };
    if let Some(disposition) = fire(trigger) {
        disposition.execute();
    }
    std::process::abort()
}

/// Wires triggers to the real failure sources of this process.
#[derive(Debug, Clone)]
pub struct OsHookRegistry {
    #[cfg(unix)]
    signals: super::signal_handler_manager::SignalOptions,
}

impl OsHookRegistry {
    pub fn new(config: &CrashtrackerConfiguration) -> Self {
        #[cfg(not(unix))]
        let _ = config;
        Self {
            #[cfg(unix)]
            signals: super::signal_handler_manager::SignalOptions {
                signals: config.signals().to_vec(),
                create_alt_stack: config.create_alt_stack(),
                use_alt_stack: config.use_alt_stack(),
            },
        }
    }

    #[cfg(unix)]
    fn register_unhandled_exception(&self) -> anyhow::Result<()> {
        super::signal_handler_manager::register_crash_handlers(&self.signals)
    }

    #[cfg(all(windows, feature = "collector_windows"))]
    fn register_unhandled_exception(&self) -> anyhow::Result<()> {
        register_exception_filter()
    }

    #[cfg(not(any(unix, all(windows, feature = "collector_windows"))))]
    fn register_unhandled_exception(&self) -> anyhow::Result<()> {
        anyhow::bail!("Unhandled exceptions cannot be intercepted on this platform")
    }
}

impl HookRegistry for OsHookRegistry {
    fn register(&mut self, kind: TriggerKind, handler: TriggerHandler) -> anyhow::Result<()> {
        store_handler(kind, handler);
        match kind {
            // The host forwards these through `handle_fatal_error`.
            TriggerKind::FatalError => Ok(()),
            TriggerKind::Terminate => register_panic_hook(),
            TriggerKind::UnhandledException => self.register_unhandled_exception(),
            TriggerKind::AtExit => register_at_exit(),
        }
    }
}

/// Installs the panic hook, keeping the previous one. Registering twice is a no-op.
///
/// The previous hook runs first so the usual panic message still reaches stderr.
pub fn register_panic_hook() -> anyhow::Result<()> {
    if !PREVIOUS_PANIC_HOOK.load(SeqCst).is_null() {
        return Ok(());
    }

    let old_hook = panic::take_hook();
    let old_hook_ptr = Box::into_raw(Box::new(old_hook));
    PREVIOUS_PANIC_HOOK.swap(old_hook_ptr, SeqCst);
    panic::set_hook(Box::new(|panic_info| {
        call_previous_panic_hook(panic_info);
        let trigger = Trigger::Terminate {
            message: panic_message(panic_info),
        };
        // Fallback and a missing handler return here and let unwinding proceed.
        if let Some(disposition) = fire(trigger) {
            disposition.execute();
        }
    }));
    Ok(())
}

fn call_previous_panic_hook(panic_info: &PanicHookInfo<'_>) {
    let old_hook_ptr = PREVIOUS_PANIC_HOOK.load(SeqCst);
    if !old_hook_ptr.is_null() {
        // Safety: This pointer can only come from Box::into_raw above in register_panic_hook.
        // We borrow it here without taking ownership so it remains valid for future calls.
        unsafe {
            let old_hook = &*old_hook_ptr;
            old_hook(panic_info);
        }
    }
}

pub(crate) fn panic_message(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_info.payload();
    let text = if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Box<dyn Any>"
    };
    match panic_info.location() {
        Some(location) => format!("panicked at {location}: {text}"),
        None => format!("panicked: {text}"),
    }
}

extern "C" fn at_exit_trampoline() {
    if let Some(disposition) = fire(Trigger::AtExit) {
        disposition.execute();
    }
}

#[cfg(any(target_os = "linux", target_os = "android", windows))]
extern "C" {
    // C11; not bound by the libc crate.
    fn at_quick_exit(callback: extern "C" fn()) -> libc::c_int;
}

/// Hooks both `exit` and `quick_exit`. Registering twice is a no-op.
fn register_at_exit() -> anyhow::Result<()> {
    if AT_EXIT_REGISTERED.swap(true, SeqCst) {
        return Ok(());
    }
    // Safety: the callback is a plain function that lives for the whole process.
    let rval = unsafe { libc::atexit(at_exit_trampoline) };
    anyhow::ensure!(rval == 0, "atexit registration failed with {rval}");

    #[cfg(any(target_os = "linux", target_os = "android", windows))]
    {
        // Safety: as above.
        let rval = unsafe { at_quick_exit(at_exit_trampoline) };
        anyhow::ensure!(rval == 0, "at_quick_exit registration failed with {rval}");
    }
    Ok(())
}

#[cfg(all(windows, feature = "collector_windows"))]
mod windows_filter {
    use super::fire;
    use crate::collector::hooks::Trigger;
    use windows::Win32::System::Diagnostics::Debug::{IsDebuggerPresent, EXCEPTION_POINTERS};

    // Values from minwinbase.h; kept local to avoid pulling in more windows features.
    pub(super) const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

    pub(super) unsafe extern "system" fn unhandled_exception_filter(
        exception_info: *const EXCEPTION_POINTERS,
    ) -> i32 {
        // Let the debugger see the exception first.
        if IsDebuggerPresent().as_bool() {
            return EXCEPTION_CONTINUE_SEARCH;
        }
        let mut code = 0u32;
        // SAFETY: Windows guarantees exception_info is valid during exception handling
        if !exception_info.is_null() {
            let exception_record = (*exception_info).ExceptionRecord;
            if !exception_record.is_null() {
                code = (*exception_record).ExceptionCode.0 as u32;
            }
        }
        let trigger = Trigger::UnhandledException {
            description: format!("Unhandled exception {code:#010x}"),
        };
        if let Some(disposition) = fire(trigger) {
            disposition.execute();
        }
        EXCEPTION_CONTINUE_SEARCH
    }
}

#[cfg(all(windows, feature = "collector_windows"))]
fn register_exception_filter() -> anyhow::Result<()> {
    use windows::Win32::System::Diagnostics::Debug::{
        SetUnhandledExceptionFilter, EXCEPTION_POINTERS,
    };
    if EXCEPTION_FILTER_REGISTERED.swap(true, SeqCst) {
        return Ok(());
    }
    let filter: unsafe extern "system" fn(*const EXCEPTION_POINTERS) -> i32 =
        windows_filter::unhandled_exception_filter;
    // SAFETY: the filter is a plain function that lives for the whole process.
    unsafe { SetUnhandledExceptionFilter(Some(Some(filter))) };
    tracing::debug!("Registered unhandled exception filter");
    Ok(())
}
