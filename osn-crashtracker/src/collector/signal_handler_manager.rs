// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

use super::hooks::Trigger;
use super::os_hooks::fire;
use libc::{
    c_void, mmap, sigaltstack, siginfo_t, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ,
    PROT_WRITE, SIGSTKSZ,
};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, Signal};
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;

// Linux seems to have the most, supporting up to 64 inclusive
// https://man7.org/linux/man-pages/man7/signal.7.html
const MAX_SIGNALS: usize = 65;
static mut HANDLERS: [Option<(Signal, SigAction)>; MAX_SIGNALS] = [None; MAX_SIGNALS];
static INIT_STARTED: AtomicBool = AtomicBool::new(false);
static INIT_FINISHED: AtomicBool = AtomicBool::new(false);

/// How the fatal-signal handlers are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalOptions {
    pub signals: Vec<i32>,
    pub create_alt_stack: bool,
    pub use_alt_stack: bool,
}

/// Registers handlers for the fatal signals, remembering the previous ones for chaining.
/// Only the first call does anything; later calls return an error.
///
/// ATOMICITY:
///     If a crash occurs while this function runs, the crash handler may be registered before
///     the old handler is stored. Chaining then finds `INIT_FINISHED` unset and aborts.
pub fn register_crash_handlers(options: &SignalOptions) -> anyhow::Result<()> {
    anyhow::ensure!(
        INIT_STARTED
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_ok(),
        "Attempted to double register crash handlers"
    );

    for signum in &options.signals {
        anyhow::ensure!(
            *signum > 0 && *signum < MAX_SIGNALS as i32,
            "Signal {signum} out of range"
        );
    }

    if options.create_alt_stack {
        // Safety: This function has no documented preconditions.
        unsafe { create_alt_stack()? };
    }

    let mut errors = vec![];
    for signum in &options.signals {
        let index = *signum as usize;
        // Safety: This function has no documented preconditions.
        match unsafe { register_signal_handler(*signum, options.use_alt_stack) } {
            // SAFETY: `INIT_STARTED` is set and `INIT_FINISHED` is not, so this is the only code
            // touching `HANDLERS` right now.
            Ok(handler) => unsafe { HANDLERS[index] = Some(handler) },
            Err(e) => errors.push(format!("Unable to register signal for {signum}: {e:?}")),
        };
    }
    INIT_FINISHED.store(true, SeqCst);
    anyhow::ensure!(
        errors.is_empty(),
        "Errors registering signal handlers {errors:?}"
    );
    tracing::debug!(signals = ?options.signals, "Registered fatal signal handlers");
    Ok(())
}

pub(crate) fn signal_name(signum: i32) -> &'static str {
    Signal::try_from(signum).map(Signal::as_str).unwrap_or("UNKNOWN")
}

extern "C" fn handle_posix_sigaction(signum: i32, sig_info: *mut siginfo_t, ucontext: *mut c_void) {
    let trigger = Trigger::UnhandledException {
        description: format!("Process terminated by signal {}", signal_name(signum)),
    };
    // Abort and graceful exit do not return. Anything else means nobody handled the signal.
    if let Some(disposition) = fire(trigger) {
        disposition.execute();
    }
    // SAFETY: No preconditions.
    unsafe { chain_signal_handler(signum, sig_info, ucontext) };
}

/// Hands the signal to whatever was installed before us.
/// If we run into an unexpected condition we abort.
unsafe fn chain_signal_handler(signum: i32, sig_info: *mut siginfo_t, ucontext: *mut c_void) {
    if !INIT_FINISHED.load(SeqCst) {
        eprintln!("Crashed during signal handler setup, cannot chain {signum}, aborting");
        std::process::abort();
    }
    if signum < 0 || signum >= MAX_SIGNALS as i32 {
        eprintln!("Unexpected value for {signum}, cannot chain, aborting");
        std::process::abort();
    }
    // SAFETY: `INIT_FINISHED` is set, nothing mutates `HANDLERS` anymore.
    if let Some((signal, sigaction)) = &mut unsafe { HANDLERS[signum as usize] } {
        match sigaction.handler() {
            SigHandler::SigDfl => {
                // Restore the default and re-raise so the core dump is produced.
                if unsafe { signal::sigaction(*signal, sigaction) }.is_err() {
                    std::process::abort();
                }
                unsafe { libc::raise(signum) };
            }
            SigHandler::SigIgn => (),
            SigHandler::Handler(f) => f(signum),
            SigHandler::SigAction(f) => f(signum, sig_info, ucontext),
        }
    } else {
        eprintln!("Missing chain handler for {signum}, cannot chain, aborting");
        std::process::abort();
    }
}

/// Allocates a signal altstack, and puts a guard page at the end.
/// Inspired by https://github.com/rust-lang/rust/pull/69969/files
unsafe fn create_alt_stack() -> anyhow::Result<()> {
    // Unwinding and symbolization on the crash path use far more than the default SIGSTKSZ.
    let page_size = page_size::get();
    let sigalstack_base_size = std::cmp::max(SIGSTKSZ, 64 * page_size);
    let stackp = mmap(
        ptr::null_mut(),
        sigalstack_base_size + page_size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    anyhow::ensure!(
        stackp != MAP_FAILED,
        "failed to allocate an alternative stack"
    );
    let guard_result = libc::mprotect(stackp, page_size, PROT_NONE);
    anyhow::ensure!(
        guard_result == 0,
        "failed to set up alternative stack guard page"
    );
    let stackp = stackp.add(page_size);

    let stack = libc::stack_t {
        ss_sp: stackp,
        ss_flags: 0,
        ss_size: sigalstack_base_size,
    };
    let rval = sigaltstack(&stack, ptr::null_mut());
    anyhow::ensure!(rval == 0, "sigaltstack failed {rval}");
    Ok(())
}

unsafe fn register_signal_handler(
    signum: i32,
    use_alt_stack: bool,
) -> anyhow::Result<(Signal, SigAction)> {
    let signal_type = Signal::try_from(signum)?;

    // Runtimes that set up their own altstack need us to USE it without creating one; the
    // paradoxical create-but-not-use case is rejected by the configuration.
    let extra_saflags = if use_alt_stack {
        SaFlags::SA_ONSTACK
    } else {
        SaFlags::empty()
    };

    let sig_action = SigAction::new(
        SigHandler::SigAction(handle_posix_sigaction),
        SaFlags::SA_NODEFER | extra_saflags,
        signal::SigSet::empty(),
    );

    let old_handler = signal::sigaction(signal_type, &sig_action)?;
    Ok((signal_type, old_handler))
}
