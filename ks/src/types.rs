//! Record types persisted by the KnowStore

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of an observed condition
///
/// Ordered: `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "critical" | "crit" => Ok(Self::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Lifecycle state of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Investigating,
    Resolved,
    Closed,
}

impl IssueStatus {
    /// Whether the issue still accepts new timeline entries as-is
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Investigating)
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Investigating => write!(f, "investigating"),
            Self::Resolved => write!(f, "resolved"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One timeline entry on an issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

/// A remediation attempt recorded against an issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionNote {
    pub timestamp: DateTime<Utc>,
    /// Id of the proposed action this note records
    pub action_id: String,
    pub summary: String,
    pub success: bool,
}

/// A long-lived issue correlating trigger events and remediation attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub host: String,
    /// Service or metric the issue is about
    pub subject: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fingerprints of trigger events correlated into this issue
    pub fingerprints: Vec<String>,
    /// Number of events folded into this issue
    pub event_count: u64,
    pub investigations: Vec<Investigation>,
    pub actions: Vec<ActionNote>,
    pub resolution: Option<String>,
}

impl Issue {
    /// Create a fresh open issue
    pub fn new(
        host: impl Into<String>,
        subject: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            host: host.into(),
            subject: subject.into(),
            title: title.into(),
            description: description.into(),
            severity,
            status: IssueStatus::Open,
            created_at: now,
            updated_at: now,
            fingerprints: Vec::new(),
            event_count: 0,
            investigations: Vec::new(),
            actions: Vec::new(),
            resolution: None,
        }
    }

    /// Append a timeline note and bump the update stamp
    pub fn add_investigation(&mut self, note: impl Into<String>) {
        self.investigations.push(Investigation {
            timestamp: Utc::now(),
            note: note.into(),
        });
        self.updated_at = Utc::now();
    }

    /// Record a remediation attempt
    pub fn add_action(&mut self, action_id: impl Into<String>, summary: impl Into<String>, success: bool) {
        self.actions.push(ActionNote {
            timestamp: Utc::now(),
            action_id: action_id.into(),
            summary: summary.into(),
            success,
        });
        self.updated_at = Utc::now();
    }

    /// Mark the issue resolved with a resolution note
    pub fn resolve(&mut self, resolution: impl Into<String>) {
        self.status = IssueStatus::Resolved;
        self.resolution = Some(resolution.into());
        self.updated_at = Utc::now();
    }
}

/// An operator- or reasoner-authored knowledge note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub topic: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            topic: topic.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A host known to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub host: String,
    pub os: String,
    pub kernel: String,
    pub cores: u32,
    pub total_mem_mb: u64,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn test_severity_round_trip() {
        for sev in [Severity::Info, Severity::Warning, Severity::Critical] {
            let parsed: Severity = sev.to_string().parse().unwrap();
            assert_eq!(parsed, sev);
        }
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn test_issue_status_active() {
        assert!(IssueStatus::Open.is_active());
        assert!(IssueStatus::Investigating.is_active());
        assert!(!IssueStatus::Resolved.is_active());
        assert!(!IssueStatus::Closed.is_active());
    }

    #[test]
    fn test_issue_timeline() {
        let mut issue = Issue::new("h1", "nginx.service", "nginx down", "service failed", Severity::Warning);
        assert_eq!(issue.status, IssueStatus::Open);

        issue.add_investigation("restart proposed");
        issue.add_action("act-1", "systemctl restart nginx", true);
        issue.resolve("service recovered after restart");

        assert_eq!(issue.investigations.len(), 1);
        assert_eq!(issue.actions.len(), 1);
        assert_eq!(issue.status, IssueStatus::Resolved);
        assert!(issue.resolution.is_some());
    }
}
