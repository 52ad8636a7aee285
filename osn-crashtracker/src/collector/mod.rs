// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
mod atom_guard;
mod breadcrumbs;
mod counters;
mod crash_handler;
pub(crate) mod hooks;
mod host;
mod known_failures;
#[cfg(feature = "collector")]
mod os_hooks;
#[cfg(all(unix, feature = "collector"))]
mod signal_handler_manager;
mod snapshot;
mod unwinder;

pub use atom_guard::{GuardToken, RecursionGuard, ReentryError};
pub use breadcrumbs::{rpc_args_to_attributes, Breadcrumb, BreadcrumbLedger, RpcValue};
pub use counters::{CountersSnapshot, PipelineCounters, PipelineStep};
pub use crash_handler::{CrashHandlerError, CrashSubsystem};
pub use hooks::{Disposition, FakeHookRegistry, HookRegistry, Trigger, TriggerHandler, TriggerKind};
pub use host::{EngineHost, LogBuffer, NoEngine};
pub use known_failures::KnownFailureSet;
#[cfg(feature = "collector")]
pub use os_hooks::{handle_fatal_error, register_panic_hook, OsHookRegistry};
#[cfg(all(unix, feature = "collector"))]
pub use signal_handler_manager::{register_crash_handlers, SignalOptions};
pub use snapshot::{pretty_bytes, ResourceSnapshot, SystemSampler};
pub use unwinder::{
    capture, capture_raw, collapse, BacktraceResolver, RawFrame, ResolvedSymbol, SymbolResolver,
    UnwoundStack,
};
