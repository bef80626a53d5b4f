//! Context entry types
//!
//! The rolling window is a sequence of typed entries; each stores the
//! token count computed when it was built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityReport;
use crate::context::tokens::estimate_tokens;
use crate::trigger::TriggerEvent;

/// The payload variants a window entry can carry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryPayload {
    /// Host identity and standing instructions; pinned, never dropped
    SystemHeader { text: String },
    /// An admitted trigger event
    Trigger(TriggerEvent),
    /// A rendered metrics observation
    MetricSummary { text: String },
    /// A utilization snapshot
    Activity(ActivityReport),
    /// Outcome of one review cycle
    ReviewSummary { status: String, text: String },
    /// Deep analysis from the meta tier; the newest one is pinned
    MetaAnalysis { text: String },
    /// Result of an executed or rejected action
    ActionOutcome {
        action_id: String,
        subject: String,
        success: bool,
        summary: String,
    },
    /// Compression product: a run of same-fingerprint events
    Coalesced {
        fingerprint: String,
        count: u64,
        reason: String,
        first: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    /// Compression product: an LLM summary of aged entries
    Summary { text: String },
}

/// One entry in the context window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub timestamp: DateTime<Utc>,
    /// Computed at construction, never recounted
    pub token_count: u64,
    pub payload: EntryPayload,
}

impl ContextEntry {
    /// Build an entry, computing its token count from the rendered form
    pub fn new(payload: EntryPayload) -> Self {
        let timestamp = match &payload {
            EntryPayload::Trigger(event) => event.timestamp,
            EntryPayload::Activity(report) => report.timestamp,
            EntryPayload::Coalesced { last, .. } => *last,
            _ => Utc::now(),
        };
        let mut entry = Self {
            timestamp,
            token_count: 0,
            payload,
        };
        entry.token_count = estimate_tokens(&entry.render());
        entry
    }

    /// Render the entry as prompt text
    pub fn render(&self) -> String {
        let stamp = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        match &self.payload {
            EntryPayload::SystemHeader { text } => text.clone(),
            EntryPayload::Trigger(event) => format!(
                "[{}] {} {} {}: {}",
                stamp, event.severity, event.kind, event.subject, event.reason
            ),
            EntryPayload::MetricSummary { text } => format!("[{}] metrics: {}", stamp, text),
            EntryPayload::Activity(report) => format!("[{}] {}", stamp, report.render()),
            EntryPayload::ReviewSummary { status, text } => {
                format!("[{}] review ({}): {}", stamp, status, text)
            }
            EntryPayload::MetaAnalysis { text } => format!("[{}] analysis: {}", stamp, text),
            EntryPayload::ActionOutcome {
                action_id,
                subject,
                success,
                summary,
            } => {
                let verdict = if *success { "ok" } else { "failed" };
                format!("[{}] action {} on {} {}: {}", stamp, action_id, subject, verdict, summary)
            }
            EntryPayload::Coalesced {
                count, reason, first, last, ..
            } => format!(
                "{}x {} between {} and {}",
                count,
                reason,
                first.format("%H:%M:%S"),
                last.format("%H:%M:%S")
            ),
            EntryPayload::Summary { text } => format!("[{}] earlier: {}", stamp, text),
        }
    }

    /// Whether compression may rewrite or drop this entry
    pub fn compressible(&self) -> bool {
        !matches!(self.payload, EntryPayload::SystemHeader { .. })
    }

    /// Debounce key, for entries that carry one
    pub fn fingerprint(&self) -> Option<&str> {
        match &self.payload {
            EntryPayload::Trigger(event) => Some(&event.fingerprint),
            EntryPayload::Coalesced { fingerprint, .. } => Some(fingerprint),
            _ => None,
        }
    }

    /// The human-facing reason line, for coalescing
    pub fn reason(&self) -> Option<&str> {
        match &self.payload {
            EntryPayload::Trigger(event) => Some(&event.reason),
            EntryPayload::Coalesced { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self.payload, EntryPayload::SystemHeader { .. })
    }

    pub fn is_meta_analysis(&self) -> bool {
        matches!(self.payload, EntryPayload::MetaAnalysis { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerKind;
    use knowstore::Severity;

    #[test]
    fn test_token_count_matches_render() {
        let entry = ContextEntry::new(EntryPayload::MetricSummary {
            text: "cpu at 95 percent".to_string(),
        });
        assert_eq!(entry.token_count, estimate_tokens(&entry.render()));
        assert!(entry.token_count > 0);
    }

    #[test]
    fn test_header_is_not_compressible() {
        let header = ContextEntry::new(EntryPayload::SystemHeader {
            text: "host web1".to_string(),
        });
        assert!(!header.compressible());
        assert!(header.is_header());

        let trigger = ContextEntry::new(EntryPayload::Trigger(TriggerEvent::new(
            TriggerKind::ServiceState,
            Severity::Warning,
            "nginx.service",
            "failed",
        )));
        assert!(trigger.compressible());
    }

    #[test]
    fn test_trigger_entry_exposes_fingerprint_and_timestamp() {
        let event = TriggerEvent::new(TriggerKind::ServiceState, Severity::Warning, "nginx.service", "failed");
        let ts = event.timestamp;
        let fp = event.fingerprint.clone();

        let entry = ContextEntry::new(EntryPayload::Trigger(event));
        assert_eq!(entry.fingerprint(), Some(fp.as_str()));
        assert_eq!(entry.timestamp, ts);
    }

    #[test]
    fn test_coalesced_render() {
        let now = Utc::now();
        let entry = ContextEntry::new(EntryPayload::Coalesced {
            fingerprint: "metric_threshold:cpu_pct:warn".to_string(),
            count: 7,
            reason: "cpu above threshold".to_string(),
            first: now - chrono::Duration::minutes(10),
            last: now,
        });
        let text = entry.render();
        assert!(text.starts_with("7x cpu above threshold between"));
    }

    #[test]
    fn test_serde_round_trip() {
        let entry = ContextEntry::new(EntryPayload::ActionOutcome {
            action_id: "act-1".to_string(),
            subject: "nginx.service".to_string(),
            success: true,
            summary: "restarted".to_string(),
        });
        let json = serde_json::to_string(&entry).unwrap();
        let back: ContextEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token_count, entry.token_count);
        assert_eq!(back.render(), entry.render());
    }
}
