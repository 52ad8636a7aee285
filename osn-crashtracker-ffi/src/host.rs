// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use osn_crashtracker::{EngineHost, LogBuffer};
use std::sync::Arc;

/// Callbacks into the embedding engine. Any of them may be null.
///
/// They are invoked from the crash path, possibly from inside a signal handler, so they must not
/// take locks the engine may be holding when it fails.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct HostCallbacks {
    /// Returns whether the engine is still initialized. Null reads as "not initialized".
    pub is_initialized: Option<extern "C" fn() -> bool>,
    /// Returns the number of outstanding engine allocations. Null reads as 0.
    pub leak_count: Option<extern "C" fn() -> u64>,
    /// Shuts the engine down. Returns false on failure. Null means there is nothing to shut down.
    pub shutdown: Option<extern "C" fn() -> bool>,
}

/// The engine as seen through [`HostCallbacks`], plus the log lines it pushed to us.
#[derive(Debug, Clone)]
pub struct FfiHost {
    callbacks: HostCallbacks,
    log: Arc<LogBuffer>,
}

impl FfiHost {
    pub fn new(callbacks: HostCallbacks, log: Arc<LogBuffer>) -> Self {
        Self { callbacks, log }
    }
}

impl EngineHost for FfiHost {
    fn is_initialized(&self) -> bool {
        self.callbacks.is_initialized.is_some_and(|f| f())
    }

    fn leak_count(&self) -> u64 {
        self.callbacks.leak_count.map_or(0, |f| f())
    }

    fn log_lines(&self) -> Vec<String> {
        self.log.try_lines()
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(shutdown) = self.callbacks.shutdown {
            anyhow::ensure!(shutdown(), "engine shutdown callback reported failure");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn yes() -> bool {
        true
    }

    extern "C" fn no() -> bool {
        false
    }

    extern "C" fn seven() -> u64 {
        7
    }

    #[test]
    fn test_null_callbacks() -> anyhow::Result<()> {
        let host = FfiHost::new(HostCallbacks::default(), Arc::new(LogBuffer::default()));
        assert!(!host.is_initialized());
        assert_eq!(host.leak_count(), 0);
        assert!(host.log_lines().is_empty());
        host.shutdown()?;
        Ok(())
    }

    #[test]
    fn test_callbacks_are_used() {
        let log = Arc::new(LogBuffer::default());
        let host = FfiHost::new(
            HostCallbacks {
                is_initialized: Some(yes),
                leak_count: Some(seven),
                shutdown: Some(no),
            },
            log.clone(),
        );
        log.push("[video] reset");
        assert!(host.is_initialized());
        assert_eq!(host.leak_count(), 7);
        assert_eq!(host.log_lines(), vec!["[video] reset".to_string()]);
        assert!(host.shutdown().is_err());
    }
}
