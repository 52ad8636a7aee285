// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Number of return addresses captured from the faulting thread.
/// Windows caps `FramesToSkip + FramesToCapture` below 63, so we keep the same ceiling everywhere.
pub const OSN_CRASHTRACK_MAX_CAPTURED_FRAMES: usize = 62;

/// Maximum number of frames emitted in a report, bounded by the sink payload size.
pub const OSN_CRASHTRACK_MAX_REPORTED_FRAMES: usize = 50;

/// Function-name prefixes of frames that are never application code.
pub const OSN_CRASHTRACK_DEFAULT_NOT_IN_APP_PREFIXES: &[&str] =
    &["std::", "__", "core::", "alloc::"];

/// Symbol prefixes of frames that belong to the crash-handling machinery itself.
/// The C entry points are unmangled, so they only carry their `osn_crasht_` name prefix.
pub const OSN_CRASHTRACK_DEFAULT_EXCLUDED_PREFIXES: &[&str] = &[
    "osn_crashtracker::",
    "<osn_crashtracker::",
    "osn_crashtracker_ffi::",
    "<osn_crashtracker_ffi::",
    "osn_crasht_",
    "backtrace::",
    "<backtrace::",
];

// Tag names attached to every report.
pub const OSN_CRASHTRACK_TAG_STATUS: &str = "status";
pub const OSN_CRASHTRACK_TAG_LEAKS: &str = "leaks";
pub const OSN_CRASHTRACK_TAG_TOTAL_MEMORY: &str = "total memory";
pub const OSN_CRASHTRACK_TAG_USED_MEMORY: &str = "total used memory";
pub const OSN_CRASHTRACK_TAG_PROCESS_MEMORY: &str = "process memory";
pub const OSN_CRASHTRACK_TAG_CPU: &str = "cpu";

// Keys of the extra context attached to every report.
pub const OSN_CRASHTRACK_EXTRA_HOST_LOG: &str = "OBS Log";
pub const OSN_CRASHTRACK_EXTRA_PROCESS_LIST: &str = "Process List";
pub const OSN_CRASHTRACK_EXTRA_BREADCRUMBS: &str = "Breadcrumbs";

/// Rendered in place of a measurement the platform could not provide.
pub const OSN_CRASHTRACK_UNAVAILABLE: &str = "unavailable";

/// Raw message of the anomalous-exit incident.
pub const OSN_CRASHTRACK_AT_EXIT_MESSAGE: &str = "AtExit";
