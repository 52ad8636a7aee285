// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time resource usage and process list, sampled on the crash path.

use crate::shared::constants::OSN_CRASHTRACK_UNAVAILABLE;
use serde_json::{Map, Value};
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Captured fresh for every incident, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSnapshot {
    pub total_physical_memory: u64,
    pub used_physical_memory: u64,
    /// `None` when the platform cannot tell.
    pub process_memory_usage: Option<u64>,
    pub cpu_percent: Option<f32>,
}

impl ResourceSnapshot {
    pub fn total_memory_tag(&self) -> String {
        pretty_bytes(self.total_physical_memory)
    }

    pub fn used_memory_tag(&self) -> String {
        pretty_bytes(self.used_physical_memory)
    }

    pub fn process_memory_tag(&self) -> String {
        self.process_memory_usage
            .map(pretty_bytes)
            .unwrap_or_else(|| OSN_CRASHTRACK_UNAVAILABLE.to_string())
    }

    pub fn cpu_tag(&self) -> String {
        match self.cpu_percent {
            Some(cpu) if cpu.is_finite() => format!("{}%", cpu as i64),
            _ => OSN_CRASHTRACK_UNAVAILABLE.to_string(),
        }
    }
}

/// Renders a byte count with a binary-scaled suffix: `512b`, `1kb`, `1.5mb`.
pub fn pretty_bytes(bytes: u64) -> String {
    const SUFFIXES: [&str; 7] = ["b", "kb", "mb", "gb", "tb", "pb", "eb"];
    let mut suffix = 0;
    let mut count = bytes as f64;
    while count >= 1024.0 && suffix < SUFFIXES.len() - 1 {
        suffix += 1;
        count /= 1024.0;
    }
    if count.fract() == 0.0 {
        format!("{}{}", count as u64, SUFFIXES[suffix])
    } else {
        format!("{count:.1}{}", SUFFIXES[suffix])
    }
}

/// Owns the `sysinfo` state between incidents.
///
/// CPU usage is a delta between two refreshes, so [`SystemSampler::prime`] is called at install
/// time to give the crash-time refresh a baseline.
#[derive(Debug)]
pub struct SystemSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn prime(&self) {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            tracing::debug!("sysinfo does not support this platform, snapshots will be empty");
            return;
        }
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_cpu_usage();
    }

    // Crash path: if the lock is busy (the faulting thread may hold it) sample with a fresh
    // `System`, losing the CPU baseline but never blocking.
    fn with_system<R>(&self, f: impl FnOnce(&mut System) -> R) -> R {
        match self.system.try_lock() {
            Ok(mut system) => f(&mut system),
            Err(std::sync::TryLockError::Poisoned(p)) => f(&mut p.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => f(&mut System::new()),
        }
    }

    pub fn sample(&self) -> ResourceSnapshot {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return ResourceSnapshot::default();
        }
        self.with_system(|system| {
            system.refresh_memory();
            system.refresh_cpu_usage();
            let cpu = system.global_cpu_usage();
            let process_memory_usage = self.pid.and_then(|pid| {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                system.process(pid).map(|p| p.memory())
            });
            ResourceSnapshot {
                total_physical_memory: system.total_memory(),
                used_physical_memory: system.used_memory(),
                process_memory_usage,
                // A CPU count of zero means the refresh never saw any CPU.
                cpu_percent: (!system.cpus().is_empty()).then_some(cpu),
            }
        })
    }

    /// Running processes as `{name: pid}`, pid rendered as a string, sorted by name.
    /// `None` where the platform cannot enumerate processes.
    pub fn process_list(&self) -> Option<Map<String, Value>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        self.with_system(|system| {
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing(),
            );
            let mut entries: Vec<(String, String)> = system
                .processes()
                .iter()
                .map(|(pid, process)| {
                    (
                        process.name().to_string_lossy().into_owned(),
                        pid.as_u32().to_string(),
                    )
                })
                .collect();
            if entries.is_empty() {
                return None;
            }
            entries.sort();
            Some(
                entries
                    .into_iter()
                    .map(|(name, pid)| (name, Value::String(pid)))
                    .collect(),
            )
        })
    }
}
