// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{CrashReport, ReportSink, SinkError, StackFrame};
use crate::collector::TriggerKind;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub trait TestInstance {
    fn test_instance(seed: u64) -> Self;
}

impl TestInstance for StackFrame {
    fn test_instance(seed: u64) -> Self {
        let base = 0x7ff6_0000_0000 + (seed as usize) * 0x100;
        StackFrame {
            instruction_address: base + 0x2a,
            symbol_address: base,
            function_name: "host::render_frame".to_string(),
            source_file: format!("/build/src/render_{seed}.rs"),
            line_number: seed as u32,
            frames_omitted: None,
            in_app: true,
        }
    }
}

impl TestInstance for CrashReport {
    fn test_instance(seed: u64) -> Self {
        let tags = BTreeMap::from([
            ("status".to_string(), "initialized".to_string()),
            ("leaks".to_string(), seed.to_string()),
        ]);
        CrashReport {
            event_id: uuid::uuid!("1d6b97cb-968c-40c9-af6e-e4b4d71e8781"),
            timestamp: chrono::DateTime::from_timestamp(1568898000, 0).unwrap_or_default(),
            kind: TriggerKind::FatalError,
            raw_message: format!("device removed ({seed})"),
            crashed_function_name: Some("host::render_frame".to_string()),
            tags,
            extra: serde_json::Map::new(),
            stack_frames: vec![
                StackFrame::test_instance(seed),
                StackFrame::test_instance(seed + 1),
            ],
        }
    }
}

/// Keeps every delivered report in memory; optionally fails every delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub reports: Arc<Mutex<Vec<CrashReport>>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn delivered(&self) -> Vec<CrashReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    fn deliver(&self, report: &CrashReport) -> Result<(), SinkError> {
        self.reports.lock().unwrap().push(report.clone());
        if self.fail {
            return Err(SinkError::Rejected(503));
        }
        Ok(())
    }
}
