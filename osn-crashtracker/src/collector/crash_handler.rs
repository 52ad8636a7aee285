// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::atom_guard::RecursionGuard;
use super::breadcrumbs::{BreadcrumbLedger, RpcValue};
use super::counters::{PipelineCounters, PipelineStep};
use super::hooks::{Disposition, HookRegistry, Trigger, TriggerHandler, TriggerKind};
use super::host::EngineHost;
use super::known_failures::KnownFailureSet;
use super::snapshot::SystemSampler;
use super::unwinder;
use crate::crash_info::{
    assemble_report, deliver_best_effort, sink_for_endpoint, HostFacts, IncidentFacts, ReportSink,
};
use crate::shared::configuration::CrashtrackerConfiguration;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CrashHandlerError {
    #[error("Crash handlers were already installed")]
    AlreadyInstalled,
    #[error("Failed to register the {kind:?} hook: {message}")]
    Registration { kind: TriggerKind, message: String },
}

/// The whole crash pipeline as one owned context.
///
/// Built once from a [`CrashtrackerConfiguration`], then wired to the failure sources with
/// [`CrashSubsystem::install`]. Everything reachable from [`CrashSubsystem::dispatch`] runs on the
/// faulting thread and never waits on a lock.
pub struct CrashSubsystem {
    config: CrashtrackerConfiguration,
    known_failures: KnownFailureSet,
    breadcrumbs: BreadcrumbLedger,
    guard: RecursionGuard,
    counters: PipelineCounters,
    sampler: SystemSampler,
    host: Box<dyn EngineHost>,
    sink: Box<dyn ReportSink>,
    enabled: AtomicBool,
    installed: AtomicBool,
}

impl std::fmt::Debug for CrashSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashSubsystem")
            .field("config", &self.config)
            .field("known_failures", &self.known_failures)
            .field("counters", &self.counters)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl CrashSubsystem {
    /// Delivers to the endpoint named in `config`.
    pub fn new(config: CrashtrackerConfiguration, host: Box<dyn EngineHost>) -> Self {
        let sink = sink_for_endpoint(config.endpoint().as_ref());
        Self::with_sink(config, host, sink)
    }

    pub fn with_sink(
        config: CrashtrackerConfiguration,
        host: Box<dyn EngineHost>,
        sink: Box<dyn ReportSink>,
    ) -> Self {
        Self {
            known_failures: KnownFailureSet::new(config.known_failures().iter().cloned()),
            config,
            breadcrumbs: BreadcrumbLedger::new(),
            guard: RecursionGuard::new(),
            counters: PipelineCounters::new(),
            sampler: SystemSampler::new(),
            host,
            sink,
            enabled: AtomicBool::new(true),
            installed: AtomicBool::new(false),
        }
    }

    /// Registers one handler per enabled trigger kind. Installing twice is an error.
    /// The CPU baseline is primed here so the first crash-time sample measures something.
    pub fn install(self: &Arc<Self>, registry: &mut impl HookRegistry) -> anyhow::Result<()> {
        if self
            .installed
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            return Err(CrashHandlerError::AlreadyInstalled.into());
        }
        self.sampler.prime();

        for kind in TriggerKind::ALL {
            if !self.config.is_trigger_enabled(kind) {
                continue;
            }
            let this = Arc::clone(self);
            let handler: TriggerHandler = Arc::new(move |trigger| this.dispatch(trigger));
            registry
                .register(kind, handler)
                .map_err(|e| CrashHandlerError::Registration {
                    kind,
                    message: format!("{e:#}"),
                })?;
            tracing::debug!(?kind, "Registered crash trigger");
        }
        tracing::debug!(
            known_failures = self.known_failures.len(),
            "Crash handling installed"
        );
        Ok(())
    }

    /// Runs one incident through the pipeline and says how the failure source must finish.
    ///
    /// - re-entry (including a second thread faulting) aborts without any further step;
    /// - a fatal error whose format matches a known failure is suppressed: graceful engine
    ///   shutdown, then exit status 0; if shutdown fails it is reported like any other crash;
    /// - `AtExit` reports only while the engine is still initialized, and never aborts;
    /// - everything else is reported synchronously, then aborts.
    pub fn dispatch(&self, trigger: Trigger) -> Disposition {
        if !self.is_enabled() {
            return Disposition::Fallback;
        }
        self.counters.record(PipelineStep::Triggered);
        let Ok(token) = self.guard.enter() else {
            self.counters.record(PipelineStep::ReentryAborted);
            return Disposition::Abort;
        };

        if trigger.kind() == TriggerKind::AtExit {
            if self.host.is_initialized() {
                self.report(&trigger);
            }
            token.exit();
            return Disposition::Continue;
        }

        if let Some(known) = trigger
            .raw_format()
            .and_then(|format| self.known_failures.matching(format))
        {
            self.counters.record(PipelineStep::Suppressed);
            tracing::info!(known, "Suppressing known engine failure");
            match catch_unwind(AssertUnwindSafe(|| self.host.shutdown())) {
                Ok(Ok(())) => {
                    token.exit();
                    return Disposition::GracefulExit(0);
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Graceful shutdown failed, reporting instead");
                }
                Err(_) => tracing::warn!("Graceful shutdown panicked, reporting instead"),
            }
        }

        self.report(&trigger);
        // The guard stays latched: nothing may run between here and the abort.
        Disposition::Abort
    }

    fn report(&self, trigger: &Trigger) {
        let stack = unwinder::capture(&self.config);
        self.counters.record(PipelineStep::Unwound);

        let facts = IncidentFacts {
            snapshot: self.sampler.sample(),
            process_list: self.sampler.process_list(),
            stack,
            breadcrumbs: self.breadcrumbs.try_snapshot(),
            host: HostFacts {
                initialized: self.host.is_initialized(),
                leak_count: self.host.leak_count(),
                log_lines: self.host.log_lines(),
            },
        };
        let report = match assemble_report(trigger, facts) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Failed to assemble crash report");
                eprintln!("Failed to assemble crash report: {e}");
                return;
            }
        };
        self.counters.record(PipelineStep::ReportBuilt);

        self.counters.record(PipelineStep::DeliveryAttempted);
        if !deliver_best_effort(self.sink.as_ref(), &report) {
            self.counters.record(PipelineStep::DeliveryFailed);
        }
    }

    /// Turns crash tracking into a no-op: every trigger falls back to what would have happened
    /// without a handler. Atomic and idempotent.
    pub fn disable(&self) {
        self.enabled.store(false, SeqCst);
    }

    /// Re-enables crash tracking after [`CrashSubsystem::disable`].
    pub fn enable(&self) {
        self.enabled.store(true, SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(SeqCst)
    }

    pub fn add_breadcrumb(&self, message: impl Into<String>, attributes: Map<String, Value>) {
        self.breadcrumbs.add(message, attributes);
    }

    pub fn add_rpc_breadcrumb(&self, method: &str, args: &[RpcValue]) {
        self.breadcrumbs.add_rpc_call(method, args);
    }

    pub fn clear_breadcrumbs(&self) {
        self.breadcrumbs.clear();
    }

    pub fn breadcrumbs(&self) -> &BreadcrumbLedger {
        &self.breadcrumbs
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    pub fn config(&self) -> &CrashtrackerConfiguration {
        &self.config
    }

    pub fn host(&self) -> &dyn EngineHost {
        self.host.as_ref()
    }
}
