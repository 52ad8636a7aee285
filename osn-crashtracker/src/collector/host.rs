// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::Mutex;

/// The embedding media engine, as seen by the crash pipeline.
///
/// Every method may be called from a fault context. Implementations must not block on locks the
/// engine might be holding when it crashes.
pub trait EngineHost: Send + Sync {
    /// Whether the engine is still up. At normal process exit this means it was never shut down.
    fn is_initialized(&self) -> bool;

    /// Number of engine allocations still outstanding.
    fn leak_count(&self) -> u64;

    /// Buffered log lines, oldest first.
    fn log_lines(&self) -> Vec<String>;

    /// Best-effort graceful shutdown, used when a known failure is suppressed.
    fn shutdown(&self) -> anyhow::Result<()>;
}

/// Host used when nothing is embedded: never initialized, no leaks, no log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEngine;

impl EngineHost for NoEngine {
    fn is_initialized(&self) -> bool {
        false
    }

    fn leak_count(&self) -> u64 {
        0
    }

    fn log_lines(&self) -> Vec<String> {
        vec![]
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Bounded ring of the host's most recent log lines.
///
/// Writers take the lock; the crash path only `try_lock`s it and reports nothing if it is busy.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn try_lines(&self) -> Vec<String> {
        match self.lines.try_lock() {
            Ok(lines) => lines.iter().cloned().collect(),
            Err(std::sync::TryLockError::Poisoned(p)) => p.into_inner().iter().cloned().collect(),
            Err(std::sync::TryLockError::WouldBlock) => vec![],
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_engine() {
        let host = NoEngine;
        assert!(!host.is_initialized());
        assert_eq!(host.leak_count(), 0);
        assert!(host.log_lines().is_empty());
        assert!(host.shutdown().is_ok());
    }

    #[test]
    fn test_log_buffer_keeps_most_recent() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        assert_eq!(buffer.try_lines(), vec!["line 2", "line 3", "line 4"]);
    }
}
