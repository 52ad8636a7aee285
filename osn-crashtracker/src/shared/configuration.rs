// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::collector::hooks::TriggerKind;
use crate::shared::constants::*;
use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

/// Where assembled crash reports are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Appends the JSON report to a local file. Mostly useful for debugging and tests.
    File { path: PathBuf },
    /// Posts the JSON report to a crash-reporting service.
    Http {
        #[serde(serialize_with = "serialize_uri", deserialize_with = "deserialize_uri")]
        url: http::Uri,
    },
}

fn serialize_uri<S>(uri: &http::Uri, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&uri.to_string())
}

fn deserialize_uri<'de, D>(deserializer: D) -> Result<http::Uri, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

impl Endpoint {
    /// Accepts `file://<path>` or an `http://` url.
    pub fn from_slice(url: &str) -> anyhow::Result<Self> {
        if let Some(path) = url.strip_prefix("file://") {
            anyhow::ensure!(!path.is_empty(), "file endpoint without a path: {url}");
            return Ok(Endpoint::File {
                path: PathBuf::from(path),
            });
        }
        let uri: http::Uri = url
            .parse()
            .with_context(|| format!("invalid endpoint url: {url}"))?;
        anyhow::ensure!(
            uri.scheme_str() == Some("http"),
            "unsupported endpoint scheme in {url}"
        );
        Ok(Endpoint::Http { url: uri })
    }

    pub fn is_file_endpoint(&self) -> bool {
        matches!(self, Endpoint::File { .. })
    }
}

#[cfg(unix)]
pub fn default_signals() -> Vec<i32> {
    vec![libc::SIGBUS, libc::SIGFPE, libc::SIGILL, libc::SIGSEGV]
}

#[cfg(not(unix))]
pub fn default_signals() -> Vec<i32> {
    vec![]
}

pub fn default_triggers() -> Vec<TriggerKind> {
    vec![
        TriggerKind::FatalError,
        TriggerKind::Terminate,
        TriggerKind::UnhandledException,
        TriggerKind::AtExit,
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashtrackerConfiguration {
    create_alt_stack: bool,
    endpoint: Option<Endpoint>,
    // Symbol prefixes of frames dropped from reports (the crash machinery itself)
    excluded_prefixes: Vec<String>,
    // Substrings of engine fatal-error formats that are already triaged
    known_failures: Vec<String>,
    max_frames: usize,
    not_in_app_prefixes: Vec<String>,
    signals: Vec<i32>,
    skip_frames: usize,
    triggers: Vec<TriggerKind>,
    use_alt_stack: bool,
}

impl Default for CrashtrackerConfiguration {
    fn default() -> Self {
        Self {
            create_alt_stack: true,
            endpoint: None,
            excluded_prefixes: to_strings(OSN_CRASHTRACK_DEFAULT_EXCLUDED_PREFIXES),
            known_failures: vec![],
            max_frames: OSN_CRASHTRACK_MAX_REPORTED_FRAMES,
            not_in_app_prefixes: to_strings(OSN_CRASHTRACK_DEFAULT_NOT_IN_APP_PREFIXES),
            signals: default_signals(),
            skip_frames: 0,
            triggers: default_triggers(),
            use_alt_stack: true,
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl CrashtrackerConfiguration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        known_failures: Vec<String>,
        endpoint: Option<Endpoint>,
        create_alt_stack: bool,
        use_alt_stack: bool,
        skip_frames: usize,
        max_frames: Option<usize>,
        mut signals: Vec<i32>,
        mut triggers: Vec<TriggerKind>,
    ) -> anyhow::Result<Self> {
        // Requesting to create, but not use, the altstack is considered paradoxical.
        anyhow::ensure!(
            !create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        anyhow::ensure!(
            known_failures.iter().all(|k| !k.is_empty()),
            "Known failures must not contain an empty substring"
        );
        let max_frames = max_frames.unwrap_or(OSN_CRASHTRACK_MAX_REPORTED_FRAMES);
        anyhow::ensure!(
            max_frames > 0 && max_frames <= OSN_CRASHTRACK_MAX_REPORTED_FRAMES,
            "max_frames must be in 1..={OSN_CRASHTRACK_MAX_REPORTED_FRAMES}, got {max_frames}"
        );
        anyhow::ensure!(
            skip_frames < OSN_CRASHTRACK_MAX_CAPTURED_FRAMES,
            "skip_frames must be below {OSN_CRASHTRACK_MAX_CAPTURED_FRAMES}, got {skip_frames}"
        );

        if signals.is_empty() {
            signals = default_signals();
        } else {
            let before_len = signals.len();
            signals.sort();
            signals.dedup();
            anyhow::ensure!(
                before_len == signals.len(),
                "Signals contained duplicate elements"
            );
        }
        if triggers.is_empty() {
            triggers = default_triggers();
        } else {
            let mut seen = Vec::with_capacity(triggers.len());
            triggers.retain(|t| {
                let fresh = !seen.contains(t);
                seen.push(*t);
                fresh
            });
        }

        Ok(Self {
            create_alt_stack,
            endpoint,
            known_failures,
            max_frames,
            signals,
            skip_frames,
            triggers,
            use_alt_stack,
            ..Default::default()
        })
    }

    /// Parses a JSON object, filling missing fields with defaults, then applies the same checks as
    /// [`CrashtrackerConfiguration::new`].
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let raw: Self = serde_json::from_str(json).context("invalid crash configuration")?;
        let mut config = Self::new(
            raw.known_failures,
            raw.endpoint,
            raw.create_alt_stack,
            raw.use_alt_stack,
            raw.skip_frames,
            Some(raw.max_frames),
            raw.signals,
            raw.triggers,
        )?;
        config.not_in_app_prefixes = raw.not_in_app_prefixes;
        config.excluded_prefixes = raw.excluded_prefixes;
        Ok(config)
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn endpoint(&self) -> &Option<Endpoint> {
        &self.endpoint
    }

    pub fn excluded_prefixes(&self) -> &[String] {
        &self.excluded_prefixes
    }

    pub fn known_failures(&self) -> &[String] {
        &self.known_failures
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn not_in_app_prefixes(&self) -> &[String] {
        &self.not_in_app_prefixes
    }

    pub fn signals(&self) -> &[i32] {
        &self.signals
    }

    pub fn skip_frames(&self) -> usize {
        self.skip_frames
    }

    pub fn triggers(&self) -> &[TriggerKind] {
        &self.triggers
    }

    pub fn set_endpoint(&mut self, endpoint: Option<Endpoint>) {
        self.endpoint = endpoint;
    }

    /// Registers another triaged failure. Only meaningful before the subsystem is built from this
    /// configuration: the known-failure set is frozen afterwards.
    pub fn add_known_failure(&mut self, substring: impl Into<String>) -> anyhow::Result<()> {
        let substring = substring.into();
        anyhow::ensure!(!substring.is_empty(), "Empty known failure not allowed");
        if !self.known_failures.contains(&substring) {
            self.known_failures.push(substring);
        }
        Ok(())
    }

    pub fn set_not_in_app_prefixes(&mut self, prefixes: Vec<String>) {
        self.not_in_app_prefixes = prefixes;
    }

    pub fn set_excluded_prefixes(&mut self, prefixes: Vec<String>) {
        self.excluded_prefixes = prefixes;
    }

    pub fn set_create_alt_stack(&mut self, create_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !create_alt_stack || self.use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.create_alt_stack = create_alt_stack;
        Ok(())
    }

    pub fn set_use_alt_stack(&mut self, use_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.use_alt_stack = use_alt_stack;
        Ok(())
    }

    pub fn is_trigger_enabled(&self, kind: TriggerKind) -> bool {
        self.triggers.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_altstack_paradox() {
        let err = CrashtrackerConfiguration::new(
            vec![],
            None,
            true,
            false,
            0,
            None,
            vec![],
            vec![],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Cannot create an altstack without using it");
    }

    #[test]
    fn test_defaults_are_filled_in() -> anyhow::Result<()> {
        let config = CrashtrackerConfiguration::new(
            vec!["Failed to recreate D3D11".to_string()],
            None,
            false,
            false,
            2,
            None,
            vec![],
            vec![],
        )?;
        assert_eq!(config.max_frames(), OSN_CRASHTRACK_MAX_REPORTED_FRAMES);
        assert_eq!(config.signals(), default_signals().as_slice());
        assert_eq!(config.triggers(), default_triggers().as_slice());
        assert_eq!(config.skip_frames(), 2);
        assert!(config
            .not_in_app_prefixes()
            .iter()
            .any(|p| p == "std::"));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(CrashtrackerConfiguration::new(
            vec![String::new()],
            None,
            false,
            false,
            0,
            None,
            vec![],
            vec![]
        )
        .is_err());
        assert!(CrashtrackerConfiguration::new(
            vec![],
            None,
            false,
            false,
            0,
            Some(OSN_CRASHTRACK_MAX_REPORTED_FRAMES + 1),
            vec![],
            vec![]
        )
        .is_err());
        assert!(CrashtrackerConfiguration::new(
            vec![],
            None,
            false,
            false,
            0,
            None,
            vec![11, 11],
            vec![]
        )
        .is_err());
    }

    #[test]
    fn test_add_known_failure_dedups() -> anyhow::Result<()> {
        let mut config = CrashtrackerConfiguration::default();
        config.add_known_failure("Failed to recreate D3D11")?;
        config.add_known_failure("Failed to recreate D3D11")?;
        assert_eq!(config.known_failures().len(), 1);
        assert!(config.add_known_failure("").is_err());
        Ok(())
    }

    #[test]
    fn test_endpoint_from_slice() -> anyhow::Result<()> {
        assert_eq!(
            Endpoint::from_slice("file:///tmp/report.json")?,
            Endpoint::File {
                path: PathBuf::from("/tmp/report.json")
            }
        );
        let http = Endpoint::from_slice("http://localhost:9000/api/1/store/")?;
        assert!(!http.is_file_endpoint());
        assert!(Endpoint::from_slice("ftp://nope").is_err());
        assert!(Endpoint::from_slice("file://").is_err());
        Ok(())
    }

    #[test]
    fn test_configuration_json_roundtrip() -> anyhow::Result<()> {
        let mut config = CrashtrackerConfiguration::default();
        config.set_endpoint(Some(Endpoint::from_slice("http://127.0.0.1:1/store")?));
        config.add_known_failure("Failed to recreate D3D11")?;
        let json = serde_json::to_string(&config)?;
        let parsed: CrashtrackerConfiguration = serde_json::from_str(&json)?;
        assert_eq!(parsed, config);
        Ok(())
    }

    #[test]
    fn test_partial_json_uses_defaults() -> anyhow::Result<()> {
        let parsed: CrashtrackerConfiguration = serde_json::from_str(
            r#"{"endpoint": {"kind": "file", "path": "/tmp/crash.json"}, "skip_frames": 1}"#,
        )?;
        assert_eq!(parsed.skip_frames(), 1);
        assert!(parsed.endpoint().as_ref().is_some_and(Endpoint::is_file_endpoint));
        assert_eq!(parsed.max_frames(), OSN_CRASHTRACK_MAX_REPORTED_FRAMES);
        assert_eq!(parsed.triggers(), default_triggers().as_slice());
        Ok(())
    }

    #[test]
    fn test_from_json_validates() -> anyhow::Result<()> {
        let config = CrashtrackerConfiguration::from_json(
            r#"{"triggers": ["fatal_error", "fatal_error"], "known_failures": ["Failed to recreate D3D11"]}"#,
        )?;
        assert_eq!(config.triggers(), &[TriggerKind::FatalError]);
        assert_eq!(config.known_failures().len(), 1);

        assert!(CrashtrackerConfiguration::from_json(r#"{"max_frames": 1000}"#).is_err());
        assert!(CrashtrackerConfiguration::from_json(
            r#"{"create_alt_stack": true, "use_alt_stack": false}"#
        )
        .is_err());
        assert!(CrashtrackerConfiguration::from_json("not json").is_err());
        Ok(())
    }
}
