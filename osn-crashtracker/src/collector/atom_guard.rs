// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Reentrancy guard error: crash handler already running")]
pub struct ReentryError;

/// Process-wide latch around the crash path.
///
/// This is an atomic flag and never a lock: the faulting thread may already hold locks, and the
/// handler may be running on top of corrupted state.
#[derive(Debug, Default)]
pub struct RecursionGuard {
    inside: AtomicBool,
}

/// Proof that the caller is the one crash-handling pass currently inside the handler.
///
/// Dropping the token without calling [`GuardToken::exit`] leaves the guard latched, which is the
/// right state for every path that ends in process termination.
#[must_use]
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a RecursionGuard,
}

impl RecursionGuard {
    pub const fn new() -> Self {
        Self {
            inside: AtomicBool::new(false),
        }
    }

    /// Takes the guard. The first caller wins; anyone arriving while the guard is set gets
    /// [`ReentryError`] and must terminate without running any further logic.
    pub fn enter(&self) -> Result<GuardToken<'_>, ReentryError> {
        // CAS rather than load-then-store so two threads faulting together cannot both get in.
        match self.inside.compare_exchange(false, true, SeqCst, SeqCst) {
            Ok(_) => Ok(GuardToken { guard: self }),
            Err(_) => Err(ReentryError),
        }
    }

    pub fn is_inside(&self) -> bool {
        self.inside.load(SeqCst)
    }
}

impl GuardToken<'_> {
    /// Clears the guard after an incident that completed without aborting.
    pub fn exit(self) {
        self.guard.inside.store(false, SeqCst);
    }
}
