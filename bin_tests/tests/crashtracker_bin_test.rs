// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bin_tests::{read_reports, CrashMode};
use serde_json::Value;
use std::path::Path;
use std::process::{Command, ExitStatus};

struct Outcome {
    status: ExitStatus,
    reports: Vec<Value>,
    stderr: String,
}

fn run(mode: CrashMode) -> anyhow::Result<Outcome> {
    let dir = tempfile::tempdir()?;
    let report_path = dir.path().join("crash.json");
    let output = Command::new(env!("CARGO_BIN_EXE_crashing_test_app"))
        .arg(mode.as_str())
        .arg(&report_path)
        .output()?;
    Ok(Outcome {
        status: output.status,
        reports: read_reports(Path::new(&report_path))?,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(unix)]
fn assert_aborted(status: ExitStatus) {
    use std::os::unix::process::ExitStatusExt;
    assert_eq!(status.signal(), Some(libc::SIGABRT), "{status:?}");
}

#[cfg(not(unix))]
fn assert_aborted(status: ExitStatus) {
    assert!(!status.success(), "{status:?}");
}

fn exception(report: &Value) -> &Value {
    &report["exception"]["values"][0]
}

fn frame_functions(report: &Value) -> Vec<&str> {
    // Reporting frames carry the function in "filename".
    exception(report)["stacktrace"]["frames"]
        .as_array()
        .map(|frames| {
            frames
                .iter()
                .filter_map(|f| f["filename"].as_str())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_known_fatal_exits_cleanly() -> anyhow::Result<()> {
    let outcome = run(CrashMode::KnownFatal)?;
    assert_eq!(outcome.status.code(), Some(0), "{}", outcome.stderr);
    assert!(outcome.reports.is_empty());
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_unknown_fatal_is_reported() -> anyhow::Result<()> {
    let outcome = run(CrashMode::UnknownFatal)?;
    assert_aborted(outcome.status);
    assert_eq!(outcome.reports.len(), 1, "{}", outcome.stderr);

    let report = &outcome.reports[0];
    assert_eq!(report["level"], "fatal");
    assert_eq!(report["platform"], "native");
    assert_eq!(report["message"], "Unexpected encoder state: 3");
    assert_eq!(exception(report)["type"], "fatal_error");
    assert_eq!(report["tags"]["status"], "initialized");
    assert_eq!(report["tags"]["leaks"], "2");
    for tag in ["total memory", "total used memory", "process memory", "cpu"] {
        assert!(report["tags"][tag].is_string(), "missing tag {tag}");
    }
    assert_eq!(report["extra"]["OBS Log"][0], "[test-engine] started");
    assert_eq!(report["extra"]["Breadcrumbs"][0]["message"], "Scene.Create");
    assert!(frame_functions(report)
        .iter()
        .any(|f| f.contains("crashing_test_app::unknown_fatal")));
    assert!(frame_functions(report)
        .iter()
        .all(|f| !f.starts_with("osn_crashtracker::")));
    let culprit = report["culprit"].as_str().unwrap_or_default();
    assert!(culprit.starts_with("crashing_test_app::"), "culprit: {culprit}");
    assert_eq!(Some(culprit), frame_functions(report).first().copied());
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_exit_with_engine_up_is_reported() -> anyhow::Result<()> {
    let outcome = run(CrashMode::AtExit)?;
    assert!(outcome.status.success(), "{}", outcome.stderr);
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0]["message"], "AtExit");
    assert_eq!(exception(&outcome.reports[0])["type"], "at_exit");
    Ok(())
}

#[test]
#[cfg(target_os = "linux")]
#[cfg_attr(miri, ignore)]
fn test_quick_exit_with_engine_up_is_reported() -> anyhow::Result<()> {
    let outcome = run(CrashMode::QuickExit)?;
    assert!(outcome.status.success(), "{}", outcome.stderr);
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(exception(&outcome.reports[0])["type"], "at_exit");
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_clean_exit_is_not_reported() -> anyhow::Result<()> {
    let outcome = run(CrashMode::CleanExit)?;
    assert!(outcome.status.success(), "{}", outcome.stderr);
    assert!(outcome.reports.is_empty());
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_panic_is_reported() -> anyhow::Result<()> {
    let outcome = run(CrashMode::Panic)?;
    assert_aborted(outcome.status);
    assert!(outcome.stderr.contains("render target lost"));
    assert_eq!(outcome.reports.len(), 1);
    let report = &outcome.reports[0];
    assert_eq!(exception(report)["type"], "terminate");
    assert!(report["message"]
        .as_str()
        .is_some_and(|m| m.starts_with("panicked at") && m.ends_with("render target lost")));
    Ok(())
}

#[test]
#[cfg(unix)]
#[cfg_attr(miri, ignore)]
fn test_segv_is_reported() -> anyhow::Result<()> {
    let outcome = run(CrashMode::Segv)?;
    assert_aborted(outcome.status);
    assert_eq!(outcome.reports.len(), 1, "{}", outcome.stderr);
    let report = &outcome.reports[0];
    assert_eq!(exception(report)["type"], "unhandled_exception");
    assert_eq!(report["message"], "Process terminated by signal SIGSEGV");
    Ok(())
}
