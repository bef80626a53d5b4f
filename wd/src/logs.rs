//! Append-only JSONL streams
//!
//! Two audit streams live under the data dir: `decisions.jsonl` for
//! reasoner verdicts and `actions.jsonl` for everything the executor
//! did or refused to do.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A reasoner verdict, one line per cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    /// Which tier decided
    pub tier: String,
    pub status: String,
    pub assessment: String,
    pub action_count: usize,
    pub escalated: bool,
}

/// One executor disposition, queued or executed or rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub action_id: String,
    pub queue_id: Option<u64>,
    pub subject: String,
    pub kind: String,
    pub risk: String,
    /// executed | queued | rejected
    pub disposition: String,
    pub success: Option<bool>,
    pub summary: String,
}

/// A single append-only JSONL stream
#[derive(Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one record as a JSON line
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open log")?;
        let line = serde_json::to_string(record).context("Failed to serialize log record")?;
        writeln!(file, "{}", line).context("Failed to append log record")?;
        debug!(path = %self.path.display(), "JsonlLog::append: wrote record");
        Ok(())
    }

    /// The last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Result<Vec<String>> {
        debug!(n, path = %self.path.display(), "JsonlLog::tail: called");
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read log")?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }
}
