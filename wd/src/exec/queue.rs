//! Approval queue with on-disk journaling
//!
//! Every mutation is appended to a JSONL journal and reflected in a
//! snapshot file written atomically, so a restart restores the queue in
//! O(1) from the snapshot; the journal is the audit trail and the
//! fallback when no snapshot exists.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::exec::action::{ActionStatus, ProposedAction, QueuedAction};

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No queued action with id {0}")]
    NotFound(u64),

    #[error("Illegal transition for action {id}: {from} -> {to}")]
    InvalidTransition {
        id: u64,
        from: ActionStatus,
        to: ActionStatus,
    },

    #[error("Queue persistence failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Enqueued { entry: QueuedAction },
    Status { id: u64, status: ActionStatus, at: DateTime<Utc> },
}

/// Full-state snapshot for O(1) restore
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueSnapshot {
    next_id: u64,
    entries: Vec<QueuedAction>,
}

/// The persistent approval queue
///
/// Not internally synchronized; the executor wraps it in a mutex that is
/// never held across shell execution.
pub struct ApprovalQueue {
    journal_path: PathBuf,
    snapshot_path: PathBuf,
    entries: Vec<QueuedAction>,
    next_id: u64,
}

impl ApprovalQueue {
    /// Load the queue from disk, preferring the snapshot
    pub fn load(journal_path: PathBuf, snapshot_path: PathBuf) -> Result<Self, QueueError> {
        debug!(journal = %journal_path.display(), "ApprovalQueue::load: called");

        if snapshot_path.exists() {
            match fs::read_to_string(&snapshot_path)
                .map_err(QueueError::from)
                .and_then(|s| serde_json::from_str::<QueueSnapshot>(&s).map_err(QueueError::from))
            {
                Ok(snapshot) => {
                    info!(entries = snapshot.entries.len(), "Restored approval queue snapshot");
                    return Ok(Self {
                        journal_path,
                        snapshot_path,
                        entries: snapshot.entries,
                        next_id: snapshot.next_id,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Queue snapshot unreadable, replaying journal");
                }
            }
        }

        let mut queue = Self {
            journal_path,
            snapshot_path,
            entries: Vec::new(),
            next_id: 1,
        };
        queue.replay_journal()?;
        Ok(queue)
    }

    fn replay_journal(&mut self) -> Result<(), QueueError> {
        if !self.journal_path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&self.journal_path)?;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: JournalRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Skipping corrupt journal line");
                    continue;
                }
            };
            match record {
                JournalRecord::Enqueued { entry } => {
                    self.next_id = self.next_id.max(entry.queue_id + 1);
                    self.entries.push(entry);
                }
                JournalRecord::Status { id, status, .. } => {
                    if let Some(entry) = self.entries.iter_mut().find(|e| e.queue_id == id) {
                        entry.status = status;
                    }
                }
            }
        }
        info!(entries = self.entries.len(), "Replayed queue journal");
        Ok(())
    }

    /// Add an action in `pending` state; returns its monotonic queue id
    pub fn enqueue(&mut self, action: ProposedAction) -> Result<u64, QueueError> {
        let entry = QueuedAction {
            queue_id: self.next_id,
            action,
            queued_at: Utc::now(),
            status: ActionStatus::Pending,
        };
        self.next_id += 1;
        debug!(queue_id = entry.queue_id, "ApprovalQueue::enqueue: called");

        self.append_journal(&JournalRecord::Enqueued { entry: entry.clone() })?;
        self.entries.push(entry);
        self.write_snapshot()?;
        Ok(self.next_id - 1)
    }

    /// Move an action to a new status, enforcing the state machine
    pub fn set_status(&mut self, id: u64, status: ActionStatus) -> Result<(), QueueError> {
        debug!(id, %status, "ApprovalQueue::set_status: called");
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.queue_id == id)
            .ok_or(QueueError::NotFound(id))?;

        if !entry.status.can_transition_to(status) {
            return Err(QueueError::InvalidTransition {
                id,
                from: entry.status,
                to: status,
            });
        }
        entry.status = status;

        self.append_journal(&JournalRecord::Status {
            id,
            status,
            at: Utc::now(),
        })?;
        self.write_snapshot()?;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&QueuedAction> {
        debug!(id, "ApprovalQueue::get: called");
        self.entries.iter().find(|e| e.queue_id == id)
    }

    /// All entries, oldest first
    pub fn list(&self) -> &[QueuedAction] {
        debug!(entry_count = self.entries.len(), "ApprovalQueue::list: called");
        &self.entries
    }

    pub fn list_pending(&self) -> Vec<&QueuedAction> {
        debug!("ApprovalQueue::list_pending: called");
        self.entries.iter().filter(|e| e.status == ActionStatus::Pending).collect()
    }

    /// Depth of the pending queue, for backpressure
    pub fn pending_depth(&self) -> usize {
        let depth = self.entries.iter().filter(|e| e.status == ActionStatus::Pending).count();
        debug!(depth, "ApprovalQueue::pending_depth: returning");
        depth
    }

    fn append_journal(&self, record: &JournalRecord) -> Result<(), QueueError> {
        debug!(journal = %self.journal_path.display(), "ApprovalQueue::append_journal: called");
        if let Some(parent) = self.journal_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.journal_path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Write the snapshot atomically: temp file then rename
    fn write_snapshot(&self) -> Result<(), QueueError> {
        debug!(entry_count = self.entries.len(), "ApprovalQueue::write_snapshot: called");
        let snapshot = QueueSnapshot {
            next_id: self.next_id,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string(&snapshot)?;

        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.snapshot_path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::action::{ActionKind, ActionOrigin, Risk};
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> (PathBuf, PathBuf) {
        (dir.path().join("queue.jsonl"), dir.path().join("queue-snapshot.json"))
    }

    fn proposal(subject: &str) -> ProposedAction {
        ProposedAction::new(
            ActionKind::Investigation,
            subject,
            "look into it",
            Risk::Low,
            ActionOrigin::Review,
        )
        .with_commands(vec![format!("echo investigating {}", subject)])
    }

    #[test]
    fn test_enqueue_assigns_monotonic_ids() {
        let dir = TempDir::new().unwrap();
        let (journal, snapshot) = paths(&dir);
        let mut queue = ApprovalQueue::load(journal, snapshot).unwrap();

        let a = queue.enqueue(proposal("a")).unwrap();
        let b = queue.enqueue(proposal("b")).unwrap();
        assert!(b > a);
        assert_eq!(queue.pending_depth(), 2);
    }

    #[test]
    fn test_status_machine_enforced() {
        let dir = TempDir::new().unwrap();
        let (journal, snapshot) = paths(&dir);
        let mut queue = ApprovalQueue::load(journal, snapshot).unwrap();

        let id = queue.enqueue(proposal("a")).unwrap();

        // pending -> executed is illegal without approval
        assert!(matches!(
            queue.set_status(id, ActionStatus::Executed),
            Err(QueueError::InvalidTransition { .. })
        ));

        queue.set_status(id, ActionStatus::Approved).unwrap();
        queue.set_status(id, ActionStatus::Executed).unwrap();

        // Terminal state never revisited
        assert!(queue.set_status(id, ActionStatus::Approved).is_err());
        assert!(queue.set_status(id, ActionStatus::Pending).is_err());
    }

    #[test]
    fn test_reject_is_terminal() {
        let dir = TempDir::new().unwrap();
        let (journal, snapshot) = paths(&dir);
        let mut queue = ApprovalQueue::load(journal, snapshot).unwrap();

        let id = queue.enqueue(proposal("a")).unwrap();
        queue.set_status(id, ActionStatus::Rejected).unwrap();
        assert!(queue.set_status(id, ActionStatus::Approved).is_err());
    }

    #[test]
    fn test_unknown_id_errors() {
        let dir = TempDir::new().unwrap();
        let (journal, snapshot) = paths(&dir);
        let mut queue = ApprovalQueue::load(journal, snapshot).unwrap();
        assert!(matches!(queue.set_status(99, ActionStatus::Approved), Err(QueueError::NotFound(99))));
    }

    #[test]
    fn test_persistence_across_restart() {
        let dir = TempDir::new().unwrap();
        let (journal, snapshot) = paths(&dir);

        let (first_id, second_id, payloads) = {
            let mut queue = ApprovalQueue::load(journal.clone(), snapshot.clone()).unwrap();
            let a = queue.enqueue(proposal("nginx.service")).unwrap();
            let b = queue.enqueue(proposal("disk")).unwrap();
            let payloads: Vec<String> = queue
                .list()
                .iter()
                .map(|e| serde_json::to_string(&e.action).unwrap())
                .collect();
            (a, b, payloads)
        };

        let queue = ApprovalQueue::load(journal, snapshot).unwrap();
        let pending = queue.list_pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].queue_id, first_id);
        assert_eq!(pending[1].queue_id, second_id);

        // Identical payloads after restart
        let restored: Vec<String> = pending.iter().map(|e| serde_json::to_string(&e.action).unwrap()).collect();
        assert_eq!(restored, payloads);
    }

    #[test]
    fn test_restore_from_journal_when_snapshot_missing() {
        let dir = TempDir::new().unwrap();
        let (journal, snapshot) = paths(&dir);

        let id = {
            let mut queue = ApprovalQueue::load(journal.clone(), snapshot.clone()).unwrap();
            let id = queue.enqueue(proposal("a")).unwrap();
            queue.set_status(id, ActionStatus::Approved).unwrap();
            id
        };

        fs::remove_file(&snapshot).unwrap();
        let queue = ApprovalQueue::load(journal, snapshot).unwrap();

        let entry = queue.get(id).unwrap();
        assert_eq!(entry.status, ActionStatus::Approved);
        // New ids continue past the replayed ones
        assert!(queue.next_id > id);
    }

    #[test]
    fn test_new_ids_continue_after_restart() {
        let dir = TempDir::new().unwrap();
        let (journal, snapshot) = paths(&dir);

        let first = {
            let mut queue = ApprovalQueue::load(journal.clone(), snapshot.clone()).unwrap();
            queue.enqueue(proposal("a")).unwrap()
        };

        let mut queue = ApprovalQueue::load(journal, snapshot).unwrap();
        let second = queue.enqueue(proposal("b")).unwrap();
        assert!(second > first);
    }
}
