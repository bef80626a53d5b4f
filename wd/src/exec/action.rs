//! Proposed and queued action types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What class of change an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ServiceRestart,
    Cleanup,
    Investigation,
    ConfigChange,
    Rebuild,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceRestart => write!(f, "service_restart"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Investigation => write!(f, "investigation"),
            Self::ConfigChange => write!(f, "config_change"),
            Self::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// Risk classification; ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Risk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Which reasoner (or human) proposed the action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    Review,
    Meta,
    User,
}

/// A remediation proposed by a reasoner or the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub id: String,
    /// Service or resource the action targets
    pub subject: String,
    pub description: String,
    pub kind: ActionKind,
    /// Shell commands, executed in order (investigation and config
    /// changes); restart, cleanup, and rebuild use canonical commands
    pub commands: Vec<String>,
    pub risk: Risk,
    pub rationale: String,
    pub rollback_plan: String,
    pub origin: ActionOrigin,
}

impl ProposedAction {
    pub fn new(kind: ActionKind, subject: impl Into<String>, description: impl Into<String>, risk: Risk, origin: ActionOrigin) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            subject: subject.into(),
            description: description.into(),
            kind,
            commands: Vec::new(),
            risk,
            rationale: String::new(),
            rollback_plan: String::new(),
            origin,
        }
    }

    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }
}

/// Lifecycle state of a queued action
///
/// `pending -> approved -> executed | failed` and `pending -> rejected`;
/// terminal states are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Executed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, ActionStatus::Approved)
                | (Self::Pending, ActionStatus::Rejected)
                | (Self::Approved, ActionStatus::Executed)
                | (Self::Approved, ActionStatus::Failed)
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A proposed action waiting in (or settled through) the approval queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Monotonic queue id, assigned at enqueue
    pub queue_id: u64,
    pub action: ProposedAction,
    pub queued_at: DateTime<Utc>,
    pub status: ActionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_ordering() {
        assert!(Risk::Low < Risk::Medium);
        assert!(Risk::Medium < Risk::High);
    }

    #[test]
    fn test_status_transitions() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Approved));
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Rejected));
        assert!(ActionStatus::Approved.can_transition_to(ActionStatus::Executed));
        assert!(ActionStatus::Approved.can_transition_to(ActionStatus::Failed));

        // Terminal states never move
        for terminal in [ActionStatus::Rejected, ActionStatus::Executed, ActionStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                ActionStatus::Pending,
                ActionStatus::Approved,
                ActionStatus::Rejected,
                ActionStatus::Executed,
                ActionStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }

        // No skipping approval
        assert!(!ActionStatus::Pending.can_transition_to(ActionStatus::Executed));
        assert!(!ActionStatus::Pending.can_transition_to(ActionStatus::Failed));
    }

    #[test]
    fn test_action_ids_are_unique() {
        let a = ProposedAction::new(ActionKind::Cleanup, "disk", "clean up", Risk::Low, ActionOrigin::Review);
        let b = ProposedAction::new(ActionKind::Cleanup, "disk", "clean up", Risk::Low, ActionOrigin::Review);
        assert_ne!(a.id, b.id);
    }
}
