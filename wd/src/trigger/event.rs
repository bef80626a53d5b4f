//! Trigger event types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use knowstore::Severity;
use serde::{Deserialize, Serialize};

/// What kind of probe produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    LogPattern,
    MetricThreshold,
    ServiceState,
    Classifier,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogPattern => write!(f, "log_pattern"),
            Self::MetricThreshold => write!(f, "metric_threshold"),
            Self::ServiceState => write!(f, "service_state"),
            Self::Classifier => write!(f, "classifier"),
        }
    }
}

/// An immutable observation produced by the trigger loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: TriggerKind,
    pub severity: Severity,
    /// Service name, metric name, or rule id the event is about
    pub subject: String,
    pub reason: String,
    pub metadata: BTreeMap<String, String>,
    /// Deterministic debounce key, stable across restarts
    pub fingerprint: String,
}

impl TriggerEvent {
    /// Create an event; the fingerprint is derived from kind, subject,
    /// and severity bucket
    pub fn new(kind: TriggerKind, severity: Severity, subject: impl Into<String>, reason: impl Into<String>) -> Self {
        let subject = subject.into();
        let fingerprint = fingerprint(kind, &subject, severity);
        Self {
            timestamp: Utc::now(),
            kind,
            severity,
            subject,
            reason: reason.into(),
            metadata: BTreeMap::new(),
            fingerprint,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Raise the severity, never lower it, and refresh the fingerprint
    pub fn raise_severity(&mut self, severity: Severity) {
        if severity > self.severity {
            self.severity = severity;
            self.fingerprint = fingerprint(self.kind, &self.subject, self.severity);
        }
    }
}

/// Compose the debounce key for `(kind, subject, severity-bucket)`
///
/// Info and warning share a bucket so a flapping warning does not re-fire
/// as a separate stream of info events; critical gets its own bucket.
pub fn fingerprint(kind: TriggerKind, subject: &str, severity: Severity) -> String {
    let bucket = match severity {
        Severity::Info | Severity::Warning => "warn",
        Severity::Critical => "crit",
    };
    format!("{}:{}:{}", kind, subject, bucket)
}
