//! Issue tracker
//!
//! Correlates trigger events and action outcomes into long-lived issue
//! records keyed by `(host, subject)`. Resolved issues sit out a reopen
//! cooldown; events arriving inside it land on the resolved record
//! without reopening it.

use std::sync::Arc;

use chrono::{Duration, Utc};
use knowstore::{Issue, IssueStatus, KnowStore, StoreError};
use tracing::{debug, info};

use crate::trigger::TriggerEvent;

/// Correlation layer over the knowledge store
pub struct IssueTracker {
    store: Arc<KnowStore>,
    host: String,
    reopen_cooldown: Duration,
}

impl IssueTracker {
    pub fn new(store: Arc<KnowStore>, host: impl Into<String>, reopen_cooldown_s: i64) -> Self {
        Self {
            store,
            host: host.into(),
            reopen_cooldown: Duration::seconds(reopen_cooldown_s),
        }
    }

    /// Fold an admitted trigger event into its issue; returns the issue id
    pub fn record_event(&self, event: &TriggerEvent) -> Result<String, StoreError> {
        debug!(subject = %event.subject, fingerprint = %event.fingerprint, "IssueTracker::record_event: called");

        // Ongoing issue for the same subject absorbs the event
        if let Some(mut issue) =
            self.store
                .find_issue(&self.host, &event.subject, &[IssueStatus::Open, IssueStatus::Investigating])?
        {
            issue.add_investigation(event.reason.clone());
            if !issue.fingerprints.contains(&event.fingerprint) {
                issue.fingerprints.push(event.fingerprint.clone());
            }
            issue.severity = issue.severity.max(event.severity);
            issue.event_count += 1;
            self.store.upsert_issue(&issue)?;
            return Ok(issue.id);
        }

        // Recently resolved issues absorb recurrences without reopening
        if let Some(mut issue) = self.store.find_issue(&self.host, &event.subject, &[IssueStatus::Resolved])?
            && Utc::now() - issue.updated_at < self.reopen_cooldown
        {
            debug!(issue_id = %issue.id, "record_event: recurrence within reopen cooldown");
            issue.add_investigation(format!("recurred during cooldown: {}", event.reason));
            issue.event_count += 1;
            self.store.upsert_issue(&issue)?;
            return Ok(issue.id);
        }

        let mut issue = Issue::new(
            &self.host,
            &event.subject,
            truncate(&event.reason, 120),
            event.reason.clone(),
            event.severity,
        );
        issue.fingerprints.push(event.fingerprint.clone());
        issue.event_count = 1;
        self.store.upsert_issue(&issue)?;
        info!(issue_id = %issue.id, subject = %event.subject, "Opened issue");
        Ok(issue.id)
    }

    /// Attach an action outcome to the newest issue for its subject
    pub fn record_outcome(
        &self,
        subject: &str,
        action_id: &str,
        summary: &str,
        success: bool,
    ) -> Result<Option<String>, StoreError> {
        debug!(%subject, %action_id, success, "IssueTracker::record_outcome: called");

        let issue = self
            .store
            .find_issue(&self.host, subject, &[IssueStatus::Open, IssueStatus::Investigating])?
            .or(self
                .store
                .find_issue(&self.host, subject, &[IssueStatus::Resolved, IssueStatus::Closed])?);

        let Some(mut issue) = issue else {
            return Ok(None);
        };
        issue.add_action(action_id, summary, success);
        self.store.upsert_issue(&issue)?;
        Ok(Some(issue.id))
    }

    /// Resolve the active issue for a subject that has recovered
    pub fn resolve_recovered(&self, subject: &str, note: &str) -> Result<Option<String>, StoreError> {
        debug!(%subject, "IssueTracker::resolve_recovered: called");
        let Some(mut issue) =
            self.store
                .find_issue(&self.host, subject, &[IssueStatus::Open, IssueStatus::Investigating])?
        else {
            return Ok(None);
        };

        issue.resolve(note);
        self.store.upsert_issue(&issue)?;
        info!(issue_id = %issue.id, %subject, "Issue auto-resolved");
        Ok(Some(issue.id))
    }

    pub fn store(&self) -> &Arc<KnowStore> {
        &self.store
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerKind;
    use knowstore::Severity;

    fn tracker() -> IssueTracker {
        let store = Arc::new(KnowStore::open_in_memory().unwrap());
        IssueTracker::new(store, "testhost", 86_400)
    }

    fn event(subject: &str, severity: Severity) -> TriggerEvent {
        TriggerEvent::new(TriggerKind::ServiceState, severity, subject, format!("{} down", subject))
    }

    #[test]
    fn test_first_event_opens_issue() {
        let tracker = tracker();
        let id = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();

        let issue = tracker.store().get_issue(&id).unwrap().unwrap();
        assert_eq!(issue.status, IssueStatus::Open);
        assert_eq!(issue.subject, "nginx.service");
        assert_eq!(issue.event_count, 1);
        assert_eq!(issue.fingerprints.len(), 1);
    }

    #[test]
    fn test_repeat_event_appends_to_open_issue() {
        let tracker = tracker();
        let first = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();
        let second = tracker.record_event(&event("nginx.service", Severity::Critical)).unwrap();

        assert_eq!(first, second);
        let issue = tracker.store().get_issue(&first).unwrap().unwrap();
        assert_eq!(issue.event_count, 2);
        // Severity only ratchets upward
        assert_eq!(issue.severity, Severity::Critical);
    }

    #[test]
    fn test_distinct_subjects_get_distinct_issues() {
        let tracker = tracker();
        let a = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();
        let b = tracker.record_event(&event("postgresql.service", Severity::Warning)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_recurrence_within_cooldown_stays_resolved() {
        let tracker = tracker();
        let id = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();
        tracker.resolve_recovered("nginx.service", "recovered").unwrap();

        let again = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();
        assert_eq!(id, again);

        let issue = tracker.store().get_issue(&id).unwrap().unwrap();
        assert_eq!(issue.status, IssueStatus::Resolved);
        assert!(issue.investigations.iter().any(|i| i.note.contains("recurred during cooldown")));
    }

    #[test]
    fn test_recurrence_after_cooldown_opens_new_issue() {
        let store = Arc::new(KnowStore::open_in_memory().unwrap());
        let tracker = IssueTracker::new(store.clone(), "testhost", 0);

        let id = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();
        tracker.resolve_recovered("nginx.service", "recovered").unwrap();

        let again = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();
        assert_ne!(id, again);
    }

    #[test]
    fn test_record_outcome_lands_on_newest_issue() {
        let tracker = tracker();
        let id = tracker.record_event(&event("nginx.service", Severity::Warning)).unwrap();

        let hit = tracker
            .record_outcome("nginx.service", "act-1", "systemctl restart nginx ok", true)
            .unwrap();
        assert_eq!(hit.as_deref(), Some(id.as_str()));

        let issue = tracker.store().get_issue(&id).unwrap().unwrap();
        assert_eq!(issue.actions.len(), 1);
        assert!(issue.actions[0].success);
    }

    #[test]
    fn test_record_outcome_without_issue_is_noop() {
        let tracker = tracker();
        let hit = tracker.record_outcome("ghost.service", "act-1", "whatever", true).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn test_resolve_recovered_without_issue_is_noop() {
        let tracker = tracker();
        assert!(tracker.resolve_recovered("ghost.service", "fine").unwrap().is_none());
    }
}
