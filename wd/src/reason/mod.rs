//! Tiered reasoners
//!
//! The review tier analyzes the context window on a fixed cadence and
//! either acts or escalates; the meta tier handles escalations, deep
//! checks, and conversations. Both route every proposed action through
//! the executor and record the outcome in the window, the issue
//! tracker, and the actions log.

mod meta;
mod review;
mod schema;

pub use meta::MetaReasoner;
pub use review::{CycleOutcome, ReviewReasoner};
pub use schema::{
    ActionSpec, HealthStatus, REVIEW_INSTRUCTION, REVIEW_RETRY_INSTRUCTION, ReviewIssue, ReviewOutput,
    extract_action_blocks, parse_review_output,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::{ContextEntry, ContextHandle, EntryPayload};
use crate::exec::{Disposition, ExecutionOutcome, Executor, ProposedAction, QueueError};
use crate::issues::IssueTracker;
use crate::logs::{ActionRecord, JsonlLog};
use crate::notify::{Notifier, NotifyPriority};

/// A request for the meta tier, deposited on a bounded channel
#[derive(Debug, Clone)]
pub struct Escalation {
    pub reason: String,
    /// Cooldown key for suppression
    pub fingerprint: String,
    pub requested_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(reason: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fingerprint: fingerprint.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Shared path from a proposed action to its recorded outcome
///
/// Every reasoner-proposed action goes through here so the window, the
/// issue tracker, the actions log, and the notifier see a consistent
/// story no matter which tier proposed it.
pub struct ActionRouter {
    pub executor: Arc<Executor>,
    pub context: ContextHandle,
    pub issues: Arc<IssueTracker>,
    pub notifier: Arc<Notifier>,
    pub actions_log: JsonlLog,
}

impl ActionRouter {
    /// Submit an action and record whatever the executor did with it
    pub async fn route(&self, action: ProposedAction) -> Result<Disposition, QueueError> {
        debug!(action_id = %action.id, kind = %action.kind, "ActionRouter::route: called");
        let action_id = action.id.clone();
        let subject = action.subject.clone();
        let kind = action.kind.to_string();
        let risk = action.risk.to_string();

        let disposition = self.executor.submit(action).await?;

        let (disposition_name, queue_id, success, summary) = match &disposition {
            Disposition::Executed(outcome) => {
                self.record_outcome(&action_id, &subject, outcome.success, &outcome.summary).await;
                if !outcome.success {
                    self.notifier
                        .notify("warden action failed", &format!("{}: {}", subject, outcome.summary), NotifyPriority::Medium)
                        .await;
                }
                ("executed", None, Some(outcome.success), outcome.summary.clone())
            }
            Disposition::Queued { queue_id } => {
                info!(queue_id, %subject, "Action awaiting approval");
                ("queued", Some(*queue_id), None, format!("queued as #{}", queue_id))
            }
            Disposition::Rejected { reason } => {
                warn!(%subject, %reason, "Action rejected by policy");
                self.record_outcome(&action_id, &subject, false, reason).await;
                self.notifier
                    .notify("warden policy rejection", &format!("{}: {}", subject, reason), NotifyPriority::High)
                    .await;
                ("rejected", None, Some(false), reason.clone())
            }
        };

        if let Err(e) = self.actions_log.append(&ActionRecord {
            timestamp: Utc::now(),
            action_id,
            queue_id,
            subject,
            kind,
            risk,
            disposition: disposition_name.to_string(),
            success,
            summary,
        }) {
            warn!(error = %e, "Actions log append failed");
        }

        Ok(disposition)
    }

    /// Approve a queued action, execute it, and record the outcome
    ///
    /// The operator path goes through the same recording steps as
    /// reasoner-proposed actions: window entry, issue update, audit line.
    pub async fn approve(&self, queue_id: u64) -> Result<ExecutionOutcome, QueueError> {
        debug!(queue_id, "ActionRouter::approve: called");
        let entry = self.executor.get(queue_id).await.ok_or(QueueError::NotFound(queue_id))?;
        let outcome = self.executor.approve(queue_id).await?;

        self.record_outcome(&entry.action.id, &entry.action.subject, outcome.success, &outcome.summary)
            .await;
        if !outcome.success {
            self.notifier
                .notify(
                    "warden action failed",
                    &format!("{}: {}", entry.action.subject, outcome.summary),
                    NotifyPriority::Medium,
                )
                .await;
        }

        if let Err(e) = self.actions_log.append(&ActionRecord {
            timestamp: Utc::now(),
            action_id: entry.action.id.clone(),
            queue_id: Some(queue_id),
            subject: entry.action.subject.clone(),
            kind: entry.action.kind.to_string(),
            risk: entry.action.risk.to_string(),
            disposition: "executed".to_string(),
            success: Some(outcome.success),
            summary: outcome.summary.clone(),
        }) {
            warn!(error = %e, "Actions log append failed");
        }

        Ok(outcome)
    }

    /// Reject a queued action and record the refusal
    pub async fn reject(&self, queue_id: u64) -> Result<(), QueueError> {
        debug!(queue_id, "ActionRouter::reject: called");
        let entry = self.executor.get(queue_id).await.ok_or(QueueError::NotFound(queue_id))?;
        self.executor.reject(queue_id).await?;

        let summary = "rejected by operator";
        self.record_outcome(&entry.action.id, &entry.action.subject, false, summary).await;

        if let Err(e) = self.actions_log.append(&ActionRecord {
            timestamp: Utc::now(),
            action_id: entry.action.id.clone(),
            queue_id: Some(queue_id),
            subject: entry.action.subject.clone(),
            kind: entry.action.kind.to_string(),
            risk: entry.action.risk.to_string(),
            disposition: "rejected".to_string(),
            success: Some(false),
            summary: summary.to_string(),
        }) {
            warn!(error = %e, "Actions log append failed");
        }

        Ok(())
    }

    async fn record_outcome(&self, action_id: &str, subject: &str, success: bool, summary: &str) {
        debug!(%action_id, %subject, success, "ActionRouter::record_outcome: called");
        if let Err(e) = self
            .context
            .admit(ContextEntry::new(EntryPayload::ActionOutcome {
                action_id: action_id.to_string(),
                subject: subject.to_string(),
                success,
                summary: summary.to_string(),
            }))
            .await
        {
            warn!(error = %e, "Outcome admission failed");
        }
        if let Err(e) = self.issues.record_outcome(subject, action_id, summary, success) {
            warn!(error = %e, "Outcome issue update failed");
        }
    }
}
