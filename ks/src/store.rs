//! Core KnowStore implementation

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{Issue, IssueStatus, KnowledgeEntry, SystemInfo};

/// Errors that can occur during knowledge store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Persistent store for issues, knowledge notes, and the system registry
///
/// Records are stored as JSON documents with a few indexed columns for
/// the queries the tracker needs. Similarity search is a deterministic
/// keyword-overlap score over titles and bodies.
pub struct KnowStore {
    conn: Mutex<Connection>,
}

impl KnowStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        debug!(path = %path.as_ref().display(), "KnowStore::open: called");
        let conn = Connection::open(path.as_ref())?;
        Self::init_schema(&conn)?;
        info!(path = %path.as_ref().display(), "Opened knowledge store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS issues (
                id         TEXT PRIMARY KEY,
                host       TEXT NOT NULL,
                subject    TEXT NOT NULL,
                status     TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                data       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_issues_host_subject ON issues (host, subject, status);
            CREATE TABLE IF NOT EXISTS knowledge (
                id         TEXT PRIMARY KEY,
                topic      TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                data       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS systems (
                host       TEXT PRIMARY KEY,
                updated_at INTEGER NOT NULL,
                data       TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    // === Issues ===

    /// Insert or replace an issue record
    pub fn upsert_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        debug!(id = %issue.id, status = %issue.status, "KnowStore::upsert_issue: called");
        let data = serde_json::to_string(issue)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO issues (id, host, subject, status, updated_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                issue.id,
                issue.host,
                issue.subject,
                issue.status.to_string(),
                issue.updated_at.timestamp_millis(),
                data,
            ],
        )?;
        Ok(())
    }

    /// Fetch an issue by id
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>, StoreError> {
        debug!(%id, "KnowStore::get_issue: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT data FROM issues WHERE id = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(serde_json::from_str(&row?)?)),
            None => Ok(None),
        }
    }

    /// The most recently updated issue for `(host, subject)` in any of the
    /// given states, if one exists
    pub fn find_issue(
        &self,
        host: &str,
        subject: &str,
        statuses: &[IssueStatus],
    ) -> Result<Option<Issue>, StoreError> {
        debug!(%host, %subject, "KnowStore::find_issue: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT data FROM issues WHERE host = ?1 AND subject = ?2 ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![host, subject], |row| row.get::<_, String>(0))?;
        for row in rows {
            let issue: Issue = serde_json::from_str(&row?)?;
            if statuses.contains(&issue.status) {
                return Ok(Some(issue));
            }
        }
        Ok(None)
    }

    /// List issues, optionally filtered by status, newest first
    pub fn list_issues(&self, status: Option<IssueStatus>) -> Result<Vec<Issue>, StoreError> {
        debug!(?status, "KnowStore::list_issues: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT data FROM issues ORDER BY updated_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut issues = Vec::new();
        for row in rows {
            let issue: Issue = serde_json::from_str(&row?)?;
            if status.is_none_or(|s| issue.status == s) {
                issues.push(issue);
            }
        }
        Ok(issues)
    }

    /// Top-k issues most similar to the query text
    pub fn query_issues(&self, text: &str, k: usize) -> Result<Vec<Issue>, StoreError> {
        debug!(%text, k, "KnowStore::query_issues: called");
        let issues = self.list_issues(None)?;
        Ok(rank_by_similarity(issues, text, k, |issue| {
            format!("{} {} {}", issue.title, issue.subject, issue.description)
        }))
    }

    // === Knowledge ===

    /// Insert or replace a knowledge note
    pub fn upsert_knowledge(&self, entry: &KnowledgeEntry) -> Result<(), StoreError> {
        debug!(id = %entry.id, topic = %entry.topic, "KnowStore::upsert_knowledge: called");
        let data = serde_json::to_string(entry)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO knowledge (id, topic, created_at, data) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![entry.id, entry.topic, entry.created_at.timestamp_millis(), data],
        )?;
        Ok(())
    }

    /// Top-k knowledge notes most similar to the query text
    pub fn query_knowledge(&self, text: &str, k: usize) -> Result<Vec<KnowledgeEntry>, StoreError> {
        debug!(%text, k, "KnowStore::query_knowledge: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT data FROM knowledge ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str::<KnowledgeEntry>(&row?)?);
        }
        drop(stmt);
        drop(conn);

        Ok(rank_by_similarity(entries, text, k, |entry| {
            format!("{} {}", entry.topic, entry.content)
        }))
    }

    // === Systems ===

    /// Insert or replace a system registry entry
    pub fn upsert_system(&self, system: &SystemInfo) -> Result<(), StoreError> {
        debug!(host = %system.host, "KnowStore::upsert_system: called");
        let data = serde_json::to_string(system)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO systems (host, updated_at, data) VALUES (?1, ?2, ?3)",
            rusqlite::params![system.host, system.updated_at.timestamp_millis(), data],
        )?;
        Ok(())
    }

    /// All known systems
    pub fn list_systems(&self) -> Result<Vec<SystemInfo>, StoreError> {
        debug!("KnowStore::list_systems: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT data FROM systems ORDER BY host ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut systems = Vec::new();
        for row in rows {
            systems.push(serde_json::from_str::<SystemInfo>(&row?)?);
        }
        Ok(systems)
    }
}

/// Lowercased alphanumeric tokens of a text
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Rank records by keyword overlap with the query, keep the top k
///
/// Score is the count of distinct query tokens found in the record text.
/// Records scoring zero are dropped. Ties keep input order, which callers
/// arrange newest-first.
fn rank_by_similarity<T>(records: Vec<T>, query: &str, k: usize, text_of: impl Fn(&T) -> String) -> Vec<T> {
    let query_tokens: std::collections::BTreeSet<String> = tokenize(query).into_iter().collect();
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, T)> = records
        .into_iter()
        .filter_map(|record| {
            let text = text_of(&record).to_lowercase();
            let score = query_tokens.iter().filter(|t| text.contains(t.as_str())).count();
            (score > 0).then_some((score, record))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(k).map(|(_, record)| record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    #[test]
    fn test_upsert_and_get_issue() {
        let store = KnowStore::open_in_memory().unwrap();
        let issue = Issue::new("h1", "nginx.service", "nginx down", "service entered failed state", Severity::Warning);
        store.upsert_issue(&issue).unwrap();

        let fetched = store.get_issue(&issue.id).unwrap().unwrap();
        assert_eq!(fetched.title, "nginx down");
        assert_eq!(fetched.status, IssueStatus::Open);
    }

    #[test]
    fn test_find_issue_by_host_subject_and_status() {
        let store = KnowStore::open_in_memory().unwrap();

        let mut resolved = Issue::new("h1", "nginx.service", "old outage", "previous failure", Severity::Warning);
        resolved.resolve("restarted");
        store.upsert_issue(&resolved).unwrap();

        let open = Issue::new("h1", "nginx.service", "new outage", "failed again", Severity::Critical);
        store.upsert_issue(&open).unwrap();

        let found = store
            .find_issue("h1", "nginx.service", &[IssueStatus::Open, IssueStatus::Investigating])
            .unwrap()
            .unwrap();
        assert_eq!(found.id, open.id);

        assert!(
            store
                .find_issue("h1", "postgresql.service", &[IssueStatus::Open])
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_list_issues_filters_by_status() {
        let store = KnowStore::open_in_memory().unwrap();

        store
            .upsert_issue(&Issue::new("h1", "a", "open one", "", Severity::Info))
            .unwrap();
        let mut closed = Issue::new("h1", "b", "closed one", "", Severity::Info);
        closed.status = IssueStatus::Closed;
        store.upsert_issue(&closed).unwrap();

        assert_eq!(store.list_issues(None).unwrap().len(), 2);
        assert_eq!(store.list_issues(Some(IssueStatus::Open)).unwrap().len(), 1);
        assert_eq!(store.list_issues(Some(IssueStatus::Closed)).unwrap().len(), 1);
    }

    #[test]
    fn test_query_issues_ranks_by_overlap() {
        let store = KnowStore::open_in_memory().unwrap();

        store
            .upsert_issue(&Issue::new(
                "h1",
                "root",
                "disk full on root filesystem",
                "disk usage crossed 85 percent",
                Severity::Warning,
            ))
            .unwrap();
        store
            .upsert_issue(&Issue::new(
                "h1",
                "nginx.service",
                "nginx crash loop",
                "nginx restarting repeatedly",
                Severity::Critical,
            ))
            .unwrap();

        let results = store.query_issues("disk filesystem usage", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].title.contains("disk"));

        // Unrelated query matches nothing
        assert!(store.query_issues("kerberos tickets", 5).unwrap().is_empty());
    }

    #[test]
    fn test_knowledge_round_trip_and_query() {
        let store = KnowStore::open_in_memory().unwrap();

        store
            .upsert_knowledge(&KnowledgeEntry::new(
                "nginx restarts",
                "nginx on this host needs a config check before restart",
            ))
            .unwrap();
        store
            .upsert_knowledge(&KnowledgeEntry::new("backups", "nightly borg run at 02:00"))
            .unwrap();

        let hits = store.query_knowledge("nginx restart", 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].topic, "nginx restarts");
    }

    #[test]
    fn test_systems_registry() {
        let store = KnowStore::open_in_memory().unwrap();

        let system = SystemInfo {
            host: "h1".to_string(),
            os: "NixOS 24.05".to_string(),
            kernel: "6.6.32".to_string(),
            cores: 8,
            total_mem_mb: 32768,
            notes: "primary web host".to_string(),
            updated_at: chrono::Utc::now(),
        };
        store.upsert_system(&system).unwrap();

        // Upsert replaces
        let mut updated = system.clone();
        updated.notes = "primary web host, nvme swap".to_string();
        store.upsert_system(&updated).unwrap();

        let systems = store.list_systems().unwrap();
        assert_eq!(systems.len(), 1);
        assert!(systems[0].notes.contains("nvme"));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("know.db");

        let issue = Issue::new("h1", "sshd", "sshd flap", "", Severity::Critical);
        {
            let store = KnowStore::open(&path).unwrap();
            store.upsert_issue(&issue).unwrap();
        }

        let store = KnowStore::open(&path).unwrap();
        assert!(store.get_issue(&issue.id).unwrap().is_some());
    }
}
