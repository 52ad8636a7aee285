// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

/// Steps of the crash pipeline that are counted every time they run.
/// The idea is that tests (and operators reading logs) can tell exactly how far an incident got.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PipelineStep {
    Triggered = 0,
    ReentryAborted,
    Suppressed,
    Unwound,
    ReportBuilt,
    DeliveryAttempted,
    DeliveryFailed,
    /// Dummy value to allow easier iteration
    SIZE,
}

impl PipelineStep {
    /// A static name, to avoid allocating on the crash path.
    pub fn name(self) -> &'static str {
        match self {
            PipelineStep::Triggered => "triggered",
            PipelineStep::ReentryAborted => "reentry_aborted",
            PipelineStep::Suppressed => "suppressed",
            PipelineStep::Unwound => "unwound",
            PipelineStep::ReportBuilt => "report_built",
            PipelineStep::DeliveryAttempted => "delivery_attempted",
            PipelineStep::DeliveryFailed => "delivery_failed",
            PipelineStep::SIZE => "size",
        }
    }

    const ALL: [PipelineStep; PipelineStep::SIZE as usize] = [
        PipelineStep::Triggered,
        PipelineStep::ReentryAborted,
        PipelineStep::Suppressed,
        PipelineStep::Unwound,
        PipelineStep::ReportBuilt,
        PipelineStep::DeliveryAttempted,
        PipelineStep::DeliveryFailed,
    ];
}

// In this case, we actually WANT multiple copies of the interior mutable struct
#[allow(clippy::declare_interior_mutable_const)]
const ATOMIC_ZERO: AtomicU64 = AtomicU64::new(0);

/// Lock-free counters, one per [`PipelineStep`].
#[derive(Debug)]
pub struct PipelineCounters {
    counters: [AtomicU64; PipelineStep::SIZE as usize],
}

impl Default for PipelineCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCounters {
    pub const fn new() -> Self {
        Self {
            counters: [ATOMIC_ZERO; PipelineStep::SIZE as usize],
        }
    }

    pub fn record(&self, step: PipelineStep) {
        if step != PipelineStep::SIZE {
            self.counters[step as usize].fetch_add(1, SeqCst);
        }
    }

    pub fn get(&self, step: PipelineStep) -> u64 {
        if step == PipelineStep::SIZE {
            return 0;
        }
        self.counters[step as usize].load(SeqCst)
    }

    /// ATOMICITY:
    ///     Each counter is read atomically, the set as a whole is not.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot(
            PipelineStep::ALL
                .iter()
                .map(|step| (step.name(), self.get(*step)))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot(pub BTreeMap<&'static str, u64>);

impl CountersSnapshot {
    pub fn get(&self, step: PipelineStep) -> u64 {
        self.0.get(step.name()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let counters = PipelineCounters::new();
        counters.record(PipelineStep::Triggered);
        counters.record(PipelineStep::Triggered);
        counters.record(PipelineStep::Unwound);
        counters.record(PipelineStep::SIZE);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.get(PipelineStep::Triggered), 2);
        assert_eq!(snapshot.get(PipelineStep::Unwound), 1);
        assert_eq!(snapshot.get(PipelineStep::DeliveryAttempted), 0);
        assert_eq!(snapshot.0.len(), PipelineStep::SIZE as usize);
        assert_eq!(counters.get(PipelineStep::SIZE), 0);
    }
}
