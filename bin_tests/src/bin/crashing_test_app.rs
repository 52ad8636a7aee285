// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Installs crash handling with a file endpoint, then fails the way the first argument says.
//!
//! Usage: `crashing_test_app <mode> <report path>`

use anyhow::Context;
use bin_tests::{CrashMode, KNOWN_FAILURE};
use osn_crashtracker::{
    handle_fatal_error, CrashSubsystem, CrashtrackerConfiguration, EngineHost, Endpoint,
    OsHookRegistry,
};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[cfg(any(target_os = "linux", target_os = "android"))]
extern "C" {
    fn quick_exit(status: libc::c_int) -> !;
}

static ENGINE_UP: AtomicBool = AtomicBool::new(false);

struct TestEngine;

impl EngineHost for TestEngine {
    fn is_initialized(&self) -> bool {
        ENGINE_UP.load(SeqCst)
    }

    fn leak_count(&self) -> u64 {
        2
    }

    fn log_lines(&self) -> Vec<String> {
        vec!["[test-engine] started".to_string()]
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        ENGINE_UP.store(false, SeqCst);
        Ok(())
    }
}

#[inline(never)]
fn unknown_fatal() -> ! {
    handle_fatal_error(
        "Unexpected encoder state: %d",
        "Unexpected encoder state: 3",
    )
}

#[inline(never)]
fn known_fatal() -> ! {
    handle_fatal_error(
        "Failed to initialize video: %s",
        "Failed to initialize video: no compatible adapter",
    )
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn exit_quickly() -> anyhow::Result<()> {
    unsafe { quick_exit(0) }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn exit_quickly() -> anyhow::Result<()> {
    anyhow::bail!("quick_exit is not available on this platform")
}

#[inline(never)]
fn render_panic() {
    panic!("render target lost");
}

#[inline(never)]
unsafe fn null_read() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        std::arch::asm!("mov eax, [0]", options(nostack));
    }

    #[cfg(target_arch = "aarch64")]
    {
        std::arch::asm!("mov x0, #0", "ldr x1, [x0]", options(nostack));
    }

    #[cfg(all(
        unix,
        not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64"))
    ))]
    {
        libc::raise(libc::SIGSEGV);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .init();

    let mut args = env::args().skip(1);
    let mode: CrashMode = args
        .next()
        .context("Unexpected number of arguments 1")?
        .parse()?;
    let report_path = args.next().context("Unexpected number of arguments 2")?;
    anyhow::ensure!(args.next().is_none(), "unexpected extra arguments");

    let mut config = CrashtrackerConfiguration::default();
    config.set_endpoint(Some(Endpoint::from_slice(&format!(
        "file://{report_path}"
    ))?));
    config.add_known_failure(KNOWN_FAILURE)?;

    let subsystem = Arc::new(CrashSubsystem::new(config.clone(), Box::new(TestEngine)));
    subsystem.install(&mut OsHookRegistry::new(&config))?;
    ENGINE_UP.store(true, SeqCst);
    subsystem.add_breadcrumb("Scene.Create", serde_json::Map::new());
    tracing::info!(%mode, "Crash handling installed");

    match mode {
        CrashMode::KnownFatal => known_fatal(),
        CrashMode::UnknownFatal => unknown_fatal(),
        CrashMode::AtExit => Ok(()),
        CrashMode::CleanExit => {
            subsystem.host().shutdown()?;
            Ok(())
        }
        CrashMode::QuickExit => exit_quickly(),
        CrashMode::Panic => {
            render_panic();
            Ok(())
        }
        CrashMode::Segv => {
            unsafe { null_read() };
            Ok(())
        }
    }
}
