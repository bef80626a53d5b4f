//! Journal delta reader
//!
//! Reads only the lines written since the previous tick by carrying a
//! journald cursor between reads. Read failures degrade to an empty
//! delta; the tick proceeds either way.

use std::time::Duration;
use tracing::{debug, warn};

use crate::exec::run_shell;

/// Incremental journald reader
pub struct JournalReader {
    cursor: Option<String>,
}

impl JournalReader {
    pub fn new() -> Self {
        Self { cursor: None }
    }

    /// Lines since the previous call; empty on any failure
    ///
    /// The first call only establishes the cursor so startup does not
    /// replay old history.
    pub async fn read_delta(&mut self) -> Vec<String> {
        debug!(has_cursor = self.cursor.is_some(), "JournalReader::read_delta: called");
        let command = match &self.cursor {
            Some(cursor) => format!(
                "journalctl --no-pager --show-cursor -o short-iso --after-cursor '{}'",
                cursor.replace('\'', "")
            ),
            None => "journalctl --no-pager --show-cursor -o short-iso -n 0".to_string(),
        };

        let output = match run_shell(&command, Duration::from_secs(15)).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "Journal read failed, proceeding with empty delta");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Journal read failed, proceeding with empty delta");
                return Vec::new();
            }
        };

        let first_read = self.cursor.is_none();
        let (lines, cursor) = parse_journal_output(&output.stdout);
        if let Some(cursor) = cursor {
            self.cursor = Some(cursor);
        }
        debug!(line_count = lines.len(), first_read, "JournalReader::read_delta: done");

        // Nothing to report from the cursor-establishing read
        if first_read { Vec::new() } else { lines }
    }
}

impl Default for JournalReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Split journalctl output into content lines and the trailing cursor
fn parse_journal_output(stdout: &str) -> (Vec<String>, Option<String>) {
    let mut lines = Vec::new();
    let mut cursor = None;

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("-- cursor: ") {
            cursor = Some(rest.trim().to_string());
        } else if !line.trim().is_empty() && !line.starts_with("-- ") {
            lines.push(line.to_string());
        }
    }

    (lines, cursor)
}
