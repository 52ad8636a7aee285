// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered log of recent host activity (engine actions, RPC calls), attached to every report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard, TryLockError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Breadcrumb {
    pub fn new(message: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// A value crossing the host's RPC boundary, as recorded in breadcrumbs.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Null,
    Float(f32),
    Double(f64),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    String(String),
    Binary(Vec<u8>),
}

impl RpcValue {
    /// Binary payloads are never recorded, only their presence.
    fn to_attribute(&self) -> String {
        match self {
            RpcValue::Null => "null".to_string(),
            RpcValue::Float(v) => format!("{v:.6}"),
            RpcValue::Double(v) => format!("{v:.6}"),
            RpcValue::Int32(v) => v.to_string(),
            RpcValue::Int64(v) => v.to_string(),
            RpcValue::UInt32(v) => v.to_string(),
            RpcValue::UInt64(v) => v.to_string(),
            RpcValue::String(v) => v.clone(),
            RpcValue::Binary(_) => String::new(),
        }
    }
}

/// Turns positional RPC arguments into `{"arg0": "...", "arg1": "..."}` attributes.
pub fn rpc_args_to_attributes(args: &[RpcValue]) -> Map<String, Value> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| (format!("arg{i}"), Value::String(arg.to_attribute())))
        .collect()
}

/// Append-only, process-lifetime sequence of breadcrumbs.
///
/// Appends come from arbitrary host threads and take a mutex. The crash path only ever
/// `try_lock`s it, since the faulting thread might be the one holding the lock.
#[derive(Debug, Default)]
pub struct BreadcrumbLedger {
    entries: Mutex<Vec<Breadcrumb>>,
}

impl BreadcrumbLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Breadcrumb>> {
        // A writer that panicked mid-push cannot leave a half-written Vec behind.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, message: impl Into<String>, attributes: Map<String, Value>) {
        let crumb = Breadcrumb::new(message, attributes);
        tracing::trace!(message = %crumb.message, "Recording breadcrumb");
        self.lock().push(crumb);
    }

    pub fn add_rpc_call(&self, method: &str, args: &[RpcValue]) {
        self.add(method, rpc_args_to_attributes(args));
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Breadcrumb> {
        self.lock().clone()
    }

    /// Crash-path read: never blocks. Returns `None` if another holder has the lock right now.
    pub fn try_snapshot(&self) -> Option<Vec<Breadcrumb>> {
        match self.entries.try_lock() {
            Ok(entries) => Some(entries.clone()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().clone()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_clear_then_add_keeps_insertion_order() {
        let ledger = BreadcrumbLedger::new();
        ledger.add("stale", Map::new());
        ledger.add("stale again", Map::new());

        ledger.clear();
        for i in 0..5 {
            ledger.add(format!("event {i}"), attrs(json!({ "index": i })));
        }

        let crumbs = ledger.snapshot();
        assert_eq!(crumbs.len(), 5);
        for (i, crumb) in crumbs.iter().enumerate() {
            assert_eq!(crumb.message, format!("event {i}"));
            assert_eq!(crumb.data["index"], json!(i));
        }
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let ledger = Arc::new(BreadcrumbLedger::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        ledger.add(format!("{t}:{i}"), Map::new());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let crumbs = ledger.snapshot();
        assert_eq!(crumbs.len(), 400);
        // Per-thread order survives interleaving.
        for t in 0..4 {
            let mine: Vec<_> = crumbs
                .iter()
                .filter_map(|c| c.message.strip_prefix(&format!("{t}:")))
                .map(|i| i.parse::<usize>().unwrap())
                .collect();
            assert_eq!(mine, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_try_snapshot_does_not_block() {
        let ledger = BreadcrumbLedger::new();
        ledger.add("one", Map::new());
        assert_eq!(ledger.try_snapshot().map(|c| c.len()), Some(1));

        let _held = ledger.entries.lock().unwrap();
        assert!(ledger.try_snapshot().is_none());
    }

    #[test]
    fn test_rpc_args_to_attributes() {
        let args = vec![
            RpcValue::Null,
            RpcValue::Float(1.5),
            RpcValue::Double(-2.25),
            RpcValue::Int32(-7),
            RpcValue::Int64(i64::MIN),
            RpcValue::UInt32(7),
            RpcValue::UInt64(u64::MAX),
            RpcValue::String("scene".to_string()),
            RpcValue::Binary(vec![1, 2, 3]),
        ];
        let attributes = rpc_args_to_attributes(&args);
        assert_eq!(
            Value::Object(attributes),
            json!({
                "arg0": "null",
                "arg1": "1.500000",
                "arg2": "-2.250000",
                "arg3": "-7",
                "arg4": i64::MIN.to_string(),
                "arg5": "7",
                "arg6": u64::MAX.to_string(),
                "arg7": "scene",
                "arg8": "",
            })
        );
    }

    #[test]
    fn test_rpc_breadcrumb() {
        let ledger = BreadcrumbLedger::new();
        ledger.add_rpc_call("Scene.Create", &[RpcValue::String("main".to_string())]);
        let crumbs = ledger.snapshot();
        assert_eq!(crumbs[0].message, "Scene.Create");
        assert_eq!(crumbs[0].data["arg0"], json!("main"));
    }
}
