// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared pieces of the crashing test app and the tests that drive it.

use anyhow::Context;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Fatal-error format registered as a known failure by the test app.
pub const KNOWN_FAILURE: &str = "Failed to initialize video";

/// How the test app brings itself down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashMode {
    /// Fatal error matching a known failure: clean exit with status 0, no report.
    KnownFatal,
    /// Fatal error nobody triaged yet: report, then abort.
    UnknownFatal,
    /// Returns from `main` with the engine still initialized: report, then normal exit.
    AtExit,
    /// Same as `AtExit`, but the engine shuts down first: no report.
    CleanExit,
    /// `quick_exit` with the engine still initialized: report, then exit status 0.
    QuickExit,
    /// Unhandled panic: report, then abort.
    Panic,
    /// Null pointer read: report, then abort.
    Segv,
}

impl CrashMode {
    pub const ALL: [CrashMode; 7] = [
        CrashMode::KnownFatal,
        CrashMode::UnknownFatal,
        CrashMode::AtExit,
        CrashMode::CleanExit,
        CrashMode::QuickExit,
        CrashMode::Panic,
        CrashMode::Segv,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CrashMode::KnownFatal => "known-fatal",
            CrashMode::UnknownFatal => "unknown-fatal",
            CrashMode::AtExit => "at-exit",
            CrashMode::CleanExit => "clean-exit",
            CrashMode::QuickExit => "quick-exit",
            CrashMode::Panic => "panic",
            CrashMode::Segv => "segv",
        }
    }
}

impl fmt::Display for CrashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrashMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrashMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .with_context(|| format!("unknown crash mode {s}"))
    }
}

/// Reads every report appended to a file sink. A missing file means no report was written.
pub fn read_reports(path: &Path) -> anyhow::Result<Vec<serde_json::Value>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::Deserializer::from_str(&contents)
        .into_iter()
        .collect::<Result<_, _>>()
        .context("parsing crash reports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_mode_names() -> anyhow::Result<()> {
        for mode in CrashMode::ALL {
            assert_eq!(mode.to_string().parse::<CrashMode>()?, mode);
        }
        assert!("reboot".parse::<CrashMode>().is_err());
        Ok(())
    }

    #[test]
    fn test_read_reports_missing_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(read_reports(&dir.path().join("none.json"))?.is_empty());
        Ok(())
    }
}
