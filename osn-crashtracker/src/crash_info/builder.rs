// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{CrashReport, StackFrame};
use crate::collector::{Breadcrumb, ResourceSnapshot, Trigger, TriggerKind, UnwoundStack};
use crate::shared::constants::*;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Facts about the embedding engine gathered at incident time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    pub initialized: bool,
    pub leak_count: u64,
    pub log_lines: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub struct CrashReportBuilder {
    pub crashed_function_name: Option<String>,
    pub extra: Map<String, Value>,
    pub kind: Option<TriggerKind>,
    pub message: Option<String>,
    pub stack_frames: Option<Vec<StackFrame>>,
    pub tags: BTreeMap<String, String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub uuid: Uuid,
}

impl Default for CrashReportBuilder {
    fn default() -> Self {
        Self {
            crashed_function_name: None,
            extra: Map::new(),
            kind: None,
            message: None,
            stack_frames: None,
            tags: BTreeMap::new(),
            timestamp: None,
            uuid: Uuid::new_v4(),
        }
    }
}

impl CrashReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> anyhow::Result<CrashReport> {
        let kind = self.kind.context("required field 'kind' missing")?;
        let raw_message = self.message.context("required field 'message' missing")?;
        Ok(CrashReport {
            event_id: self.uuid,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            kind,
            raw_message,
            crashed_function_name: self.crashed_function_name,
            tags: self.tags,
            extra: self.extra,
            stack_frames: self.stack_frames.unwrap_or_default(),
        })
    }

    pub fn with_kind(&mut self, kind: TriggerKind) -> anyhow::Result<()> {
        self.kind = Some(kind);
        Ok(())
    }

    pub fn with_message(&mut self, message: String) -> anyhow::Result<()> {
        self.message = Some(message);
        Ok(())
    }

    pub fn with_stack(&mut self, stack: UnwoundStack) -> anyhow::Result<()> {
        self.crashed_function_name = stack.crashed_function_name;
        self.stack_frames = Some(stack.frames);
        Ok(())
    }

    pub fn with_tag(&mut self, name: &str, value: String) -> anyhow::Result<()> {
        anyhow::ensure!(!name.is_empty(), "Empty tag name not allowed");
        self.tags.insert(name.to_string(), value);
        Ok(())
    }

    pub fn with_extra(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        anyhow::ensure!(!key.is_empty(), "Empty extra key not allowed");
        self.extra.insert(key.to_string(), value);
        Ok(())
    }

    pub fn with_snapshot(&mut self, snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        self.with_tag(OSN_CRASHTRACK_TAG_TOTAL_MEMORY, snapshot.total_memory_tag())?;
        self.with_tag(OSN_CRASHTRACK_TAG_USED_MEMORY, snapshot.used_memory_tag())?;
        self.with_tag(
            OSN_CRASHTRACK_TAG_PROCESS_MEMORY,
            snapshot.process_memory_tag(),
        )?;
        self.with_tag(OSN_CRASHTRACK_TAG_CPU, snapshot.cpu_tag())?;
        Ok(())
    }

    pub fn with_host_facts(&mut self, host: HostFacts) -> anyhow::Result<()> {
        let status = if host.initialized {
            "initialized"
        } else {
            "shutdown"
        };
        self.with_tag(OSN_CRASHTRACK_TAG_STATUS, status.to_string())?;
        self.with_tag(OSN_CRASHTRACK_TAG_LEAKS, host.leak_count.to_string())?;
        self.with_extra(
            OSN_CRASHTRACK_EXTRA_HOST_LOG,
            Value::Array(host.log_lines.into_iter().map(Value::String).collect()),
        )
    }

    /// Absent where the platform cannot enumerate processes.
    pub fn with_process_list(&mut self, processes: Option<Map<String, Value>>) -> anyhow::Result<()> {
        if let Some(processes) = processes {
            self.with_extra(OSN_CRASHTRACK_EXTRA_PROCESS_LIST, Value::Object(processes))?;
        }
        Ok(())
    }

    /// `None` means the ledger could not be read without blocking; the key is left out.
    pub fn with_breadcrumbs(&mut self, breadcrumbs: Option<Vec<Breadcrumb>>) -> anyhow::Result<()> {
        if let Some(breadcrumbs) = breadcrumbs {
            self.with_extra(
                OSN_CRASHTRACK_EXTRA_BREADCRUMBS,
                serde_json::to_value(breadcrumbs)?,
            )?;
        }
        Ok(())
    }

    pub fn with_timestamp(&mut self, timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        self.timestamp = Some(timestamp);
        Ok(())
    }

    pub fn with_timestamp_now(&mut self) -> anyhow::Result<()> {
        self.with_timestamp(Utc::now())
    }

    pub fn with_uuid(&mut self, uuid: Uuid) -> anyhow::Result<()> {
        self.uuid = uuid;
        Ok(())
    }
}

/// Everything the pipeline gathered about one incident.
#[derive(Debug, Clone, Default)]
pub struct IncidentFacts {
    pub snapshot: ResourceSnapshot,
    pub process_list: Option<Map<String, Value>>,
    pub stack: UnwoundStack,
    pub breadcrumbs: Option<Vec<Breadcrumb>>,
    pub host: HostFacts,
}

/// Composes one report from an incident and what was gathered about it. Performs no I/O.
pub fn assemble_report(trigger: &Trigger, facts: IncidentFacts) -> anyhow::Result<CrashReport> {
    let mut builder = CrashReportBuilder::new();
    builder.with_kind(trigger.kind())?;
    builder.with_message(trigger.raw_message().to_string())?;
    builder.with_stack(facts.stack)?;
    builder.with_snapshot(&facts.snapshot)?;
    builder.with_host_facts(facts.host)?;
    builder.with_process_list(facts.process_list)?;
    builder.with_breadcrumbs(facts.breadcrumbs)?;
    builder.with_timestamp_now()?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::TestInstance;
    use super::*;
    use serde_json::json;

    fn facts() -> IncidentFacts {
        IncidentFacts {
            snapshot: ResourceSnapshot {
                total_physical_memory: 16 * 1024 * 1024 * 1024,
                used_physical_memory: 6 * 1024 * 1024 * 1024,
                process_memory_usage: Some(300 * 1024 * 1024),
                cpu_percent: Some(12.5),
            },
            process_list: Some(
                [("obs64.exe".to_string(), json!("4242"))]
                    .into_iter()
                    .collect(),
            ),
            stack: UnwoundStack {
                frames: vec![StackFrame::test_instance(1)],
                crashed_function_name: Some("host::render_frame".to_string()),
            },
            breadcrumbs: Some(vec![Breadcrumb::new("Scene.Create", Map::new())]),
            host: HostFacts {
                initialized: true,
                leak_count: 3,
                log_lines: vec!["[encoder] started".to_string()],
            },
        }
    }

    #[test]
    fn test_assemble_report() -> anyhow::Result<()> {
        let trigger = Trigger::FatalError {
            format: "Device lost: %s".to_string(),
            message: "Device lost: DXGI_ERROR_DEVICE_REMOVED".to_string(),
        };
        let report = assemble_report(&trigger, facts())?;

        assert_eq!(report.kind, TriggerKind::FatalError);
        assert_eq!(report.raw_message, "Device lost: DXGI_ERROR_DEVICE_REMOVED");
        assert_eq!(
            report.crashed_function_name.as_deref(),
            Some("host::render_frame")
        );
        assert_eq!(report.tag("status"), Some("initialized"));
        assert_eq!(report.tag("leaks"), Some("3"));
        assert_eq!(report.tag("total memory"), Some("16gb"));
        assert_eq!(report.tag("total used memory"), Some("6gb"));
        assert_eq!(report.tag("process memory"), Some("300mb"));
        assert_eq!(report.tag("cpu"), Some("12%"));
        assert_eq!(report.extra["OBS Log"], json!(["[encoder] started"]));
        assert_eq!(report.extra["Process List"], json!({"obs64.exe": "4242"}));
        assert_eq!(report.extra["Breadcrumbs"][0]["message"], "Scene.Create");
        Ok(())
    }

    #[test]
    fn test_unavailable_facts_still_give_string_tags() -> anyhow::Result<()> {
        let report = assemble_report(&Trigger::AtExit, IncidentFacts::default())?;
        assert_eq!(report.raw_message, "AtExit");
        assert_eq!(report.tag("status"), Some("shutdown"));
        assert_eq!(report.tag("process memory"), Some("unavailable"));
        assert_eq!(report.tag("cpu"), Some("unavailable"));
        assert!(report.extra.get("Process List").is_none());
        assert!(report.extra.get("Breadcrumbs").is_none());
        assert!(report.stack_frames.is_empty());
        assert!(report.crashed_function_name.is_none());
        Ok(())
    }

    #[test]
    fn test_builder_fixed_identity() -> anyhow::Result<()> {
        let uuid = Uuid::parse_str("5f0c6a1e-8d3b-4c2a-9e7f-1b2c3d4e5f60")?;
        let timestamp = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")?.with_timezone(&Utc);
        let mut builder = CrashReportBuilder::new();
        builder.with_kind(TriggerKind::UnhandledException)?;
        builder.with_message("Process terminated by signal SIGSEGV".to_string())?;
        builder.with_uuid(uuid)?;
        builder.with_timestamp(timestamp)?;
        let report = builder.build()?;

        assert_eq!(report.event_id, uuid);
        let payload = report.to_payload()?;
        assert_eq!(payload["event_id"], "5f0c6a1e8d3b4c2a9e7f1b2c3d4e5f60");
        assert_eq!(payload["timestamp"], "2024-03-01T12:00:00+00:00");
        Ok(())
    }

    #[test]
    fn test_builder_requires_kind_and_message() -> anyhow::Result<()> {
        assert!(CrashReportBuilder::new().build().is_err());

        let mut builder = CrashReportBuilder::new();
        builder.with_kind(TriggerKind::Terminate)?;
        assert!(builder.with_tag("", "x".to_string()).is_err());
        builder.with_message("boom".to_string())?;
        let report = builder.build()?;
        assert!(report.stack_frames.is_empty());
        Ok(())
    }
}
