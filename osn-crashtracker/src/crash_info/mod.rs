// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod builder;
mod sink;
mod stacktrace;
#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::*;
pub use sink::*;
pub use stacktrace::*;

use crate::collector::TriggerKind;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One incident, ready for delivery. Built once, handed to the sink, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashReport {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: TriggerKind,
    pub raw_message: String,
    pub crashed_function_name: Option<String>,
    /// Tag values are always strings.
    pub tags: BTreeMap<String, String>,
    pub extra: Map<String, Value>,
    /// Innermost frame first.
    pub stack_frames: Vec<StackFrame>,
}

impl CrashReport {
    pub const LEVEL: &'static str = "fatal";

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    /// The JSON document sent to the crash-reporting service.
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    event_id: String,
    timestamp: String,
    level: &'static str,
    platform: &'static str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    culprit: Option<&'a str>,
    tags: &'a BTreeMap<String, String>,
    extra: &'a Map<String, Value>,
    exception: ExceptionList<'a>,
}

#[derive(Serialize)]
struct ExceptionList<'a> {
    values: [Exception<'a>; 1],
}

#[derive(Serialize)]
struct Exception<'a> {
    #[serde(rename = "type")]
    kind: TriggerKind,
    value: &'a str,
    stacktrace: Frames<'a>,
}

#[derive(Serialize)]
struct Frames<'a> {
    frames: &'a [StackFrame],
}

impl Serialize for CrashReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Payload {
            event_id: self.event_id.simple().to_string(),
            timestamp: self.timestamp.to_rfc3339(),
            level: Self::LEVEL,
            platform: "native",
            message: &self.raw_message,
            culprit: self.crashed_function_name.as_deref(),
            tags: &self.tags,
            extra: &self.extra,
            exception: ExceptionList {
                values: [Exception {
                    kind: self.kind,
                    value: &self.raw_message,
                    stacktrace: Frames {
                        frames: &self.stack_frames,
                    },
                }],
            },
        }
        .serialize(serializer)
    }
}
