// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::CrashReport;
use crate::shared::configuration::Endpoint;
use bytes::Bytes;
use http_body_util::Full;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write crash report to {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize crash report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to build delivery runtime: {0}")]
    Runtime(std::io::Error),
    #[error("Failed to send crash report: {0}")]
    Transport(String),
    #[error("Crash report rejected with status {0}")]
    Rejected(u16),
}

/// Hands a report to the crash-reporting service. Delivery is synchronous: when `deliver`
/// returns, the report is either accepted or lost.
pub trait ReportSink: Send + Sync {
    fn deliver(&self, report: &CrashReport) -> Result<(), SinkError>;
}

/// Appends the pretty-printed JSON payload to a local file.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for FileSink {
    fn deliver(&self, report: &CrashReport) -> Result<(), SinkError> {
        let file_error = |source| SinkError::File {
            path: self.path.clone(),
            source,
        };
        let mut file = File::options()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(file_error)?;
        serde_json::to_writer_pretty(&mut file, report)?;
        writeln!(file).map_err(file_error)?;
        Ok(())
    }
}

/// POSTs the JSON payload over plain HTTP. No timeout: the crash path waits for the answer.
#[derive(Debug, Clone)]
pub struct HttpSink {
    url: http::Uri,
}

impl HttpSink {
    pub fn new(url: http::Uri) -> Self {
        Self { url }
    }

    async fn post(&self, body: Vec<u8>) -> Result<(), SinkError> {
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::default())
                .pool_max_idle_per_host(0)
                .build_http::<Full<Bytes>>();
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(self.url.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let response = client
            .request(request)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

impl ReportSink for HttpSink {
    fn deliver(&self, report: &CrashReport) -> Result<(), SinkError> {
        let body = serde_json::to_vec(report)?;
        // The crash path never spawns threads: everything runs on this one.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SinkError::Runtime)?;
        rt.block_on(self.post(body))
    }
}

/// Used when no endpoint is configured: the report is dropped with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl ReportSink for DiscardSink {
    fn deliver(&self, report: &CrashReport) -> Result<(), SinkError> {
        tracing::warn!(
            event_id = %report.event_id,
            "No crash report endpoint configured, dropping report"
        );
        Ok(())
    }
}

pub fn sink_for_endpoint(endpoint: Option<&Endpoint>) -> Box<dyn ReportSink> {
    match endpoint {
        Some(Endpoint::File { path }) => Box::new(FileSink::new(path.clone())),
        Some(Endpoint::Http { url }) => Box::new(HttpSink::new(url.clone())),
        None => Box::new(DiscardSink),
    }
}

/// Delivers and swallows the outcome. A failed delivery is logged and written to stderr, since
/// no subscriber may be listening this late; it must never keep the process from terminating.
pub fn deliver_best_effort(sink: &dyn ReportSink, report: &CrashReport) -> bool {
    match sink.deliver(report) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, event_id = %report.event_id, "Crash report delivery failed");
            eprintln!("Failed to deliver crash report: {e}");
            false
        }
    }
}
