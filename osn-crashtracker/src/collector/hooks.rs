// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Failure sources the crash pipeline can be wired to, and the registration seam between the
//! pipeline and the OS/runtime.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// The media engine's fatal-error facility.
    FatalError,
    /// The runtime's uncaught-termination path (a Rust panic).
    Terminate,
    /// A fatal signal on unix, the unhandled-exception filter on Windows.
    UnhandledException,
    /// Normal process exit.
    AtExit,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 4] = [
        TriggerKind::FatalError,
        TriggerKind::Terminate,
        TriggerKind::UnhandledException,
        TriggerKind::AtExit,
    ];

    pub(crate) const fn index(self) -> usize {
        match self {
            TriggerKind::FatalError => 0,
            TriggerKind::Terminate => 1,
            TriggerKind::UnhandledException => 2,
            TriggerKind::AtExit => 3,
        }
    }
}

/// One incident as delivered by a failure source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `format` is the engine's raw format string, `message` the formatted text.
    FatalError { format: String, message: String },
    Terminate { message: String },
    UnhandledException { description: String },
    AtExit,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::FatalError { .. } => TriggerKind::FatalError,
            Trigger::Terminate { .. } => TriggerKind::Terminate,
            Trigger::UnhandledException { .. } => TriggerKind::UnhandledException,
            Trigger::AtExit => TriggerKind::AtExit,
        }
    }

    /// The string the known-failure filter is matched against. Only engine fatal errors carry one.
    pub fn raw_format(&self) -> Option<&str> {
        match self {
            Trigger::FatalError { format, .. } => Some(format),
            _ => None,
        }
    }

    pub fn raw_message(&self) -> &str {
        match self {
            Trigger::FatalError { message, .. } => message,
            Trigger::Terminate { message } => message,
            Trigger::UnhandledException { description } => description,
            Trigger::AtExit => crate::shared::constants::OSN_CRASHTRACK_AT_EXIT_MESSAGE,
        }
    }
}

/// What the failure source must do once the pipeline is done with an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Return to the caller; the process carries on (or finishes exiting).
    Continue,
    /// Terminate cleanly with the given status.
    GracefulExit(i32),
    /// Abnormal termination (SIGABRT / abort status).
    Abort,
    /// Crash tracking is disabled: behave as if no handler had been installed.
    Fallback,
}

impl Disposition {
    /// Carries out the termination policy. Returns only for [`Disposition::Continue`] and
    /// [`Disposition::Fallback`], where the failure source decides what comes next.
    pub fn execute(self) {
        match self {
            Disposition::Continue | Disposition::Fallback => (),
            Disposition::GracefulExit(code) => std::process::exit(code),
            Disposition::Abort => std::process::abort(),
        }
    }
}

pub type TriggerHandler = Arc<dyn Fn(Trigger) -> Disposition + Send + Sync>;

/// Capability to wire a handler to a failure source.
///
/// The production implementation talks to the OS (`os_hooks::OsHookRegistry`); tests use
/// [`FakeHookRegistry`] and fire triggers by hand.
pub trait HookRegistry {
    fn register(&mut self, kind: TriggerKind, handler: TriggerHandler) -> anyhow::Result<()>;
}

/// In-memory registry: remembers handlers so a test can play the failure source.
#[derive(Default)]
pub struct FakeHookRegistry {
    handlers: Vec<(TriggerKind, TriggerHandler)>,
}

impl FakeHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, kind: TriggerKind) -> bool {
        self.handlers.iter().any(|(k, _)| *k == kind)
    }

    /// Invokes the handler registered for the trigger's kind, if any.
    pub fn fire(&self, trigger: Trigger) -> Option<Disposition> {
        let kind = trigger.kind();
        self.handlers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, handler)| handler(trigger))
    }
}

impl HookRegistry for FakeHookRegistry {
    fn register(&mut self, kind: TriggerKind, handler: TriggerHandler) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.is_registered(kind),
            "Attempted to double register {kind:?}"
        );
        self.handlers.push((kind, handler));
        Ok(())
    }
}

impl std::fmt::Debug for FakeHookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeHookRegistry")
            .field(
                "kinds",
                &self.handlers.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            )
            .finish()
    }
}
