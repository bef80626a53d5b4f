//! The token-budgeted rolling context window
//!
//! An ordered sequence of entries with a hard token budget. Admission of
//! an entry that would exceed the budget forces compression: coalesce
//! repeated events, summarize aged entries through the small tier, then
//! drop oldest. The system header and the newest meta analysis survive
//! every stage.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::entry::{ContextEntry, EntryPayload};
use crate::context::tokens::{estimate_tokens, truncate_to_tokens};
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

/// Compression tuning
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// Entries older than this are summarization candidates
    pub soft_age_s: i64,
    /// Token target for the aged-entry summary
    pub summary_target_tokens: u64,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            soft_age_s: 3600,
            summary_target_tokens: 256,
        }
    }
}

/// How an entry made it into the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Fit without touching anything
    Admitted,
    /// Fit after compression
    Compressed,
    /// The entry alone exceeded the budget and was truncated
    Truncated,
}

/// Point-in-time copy handed to readers
///
/// Serialization is the on-disk snapshot format; restoring yields a
/// window whose next snapshot is byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub budget: u64,
    pub entries: Vec<ContextEntry>,
}

impl WindowSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.token_count).sum()
    }
}

/// The rolling window itself
///
/// Invariant: `total_tokens() <= budget` after every admission.
pub struct ContextWindow {
    budget: u64,
    entries: Vec<ContextEntry>,
}

impl ContextWindow {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            entries: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: WindowSnapshot) -> Self {
        Self {
            budget: snapshot.budget,
            entries: snapshot.entries,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn total_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.token_count).sum()
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            budget: self.budget,
            entries: self.entries.clone(),
        }
    }

    /// Install or replace the pinned system header
    pub fn set_header(&mut self, text: impl Into<String>) {
        debug!("ContextWindow::set_header: called");
        let header = ContextEntry::new(EntryPayload::SystemHeader { text: text.into() });
        match self.entries.first() {
            Some(first) if first.is_header() => self.entries[0] = header,
            _ => self.entries.insert(0, header),
        }
    }

    /// Admit an entry, compressing as needed to hold the budget invariant
    pub async fn admit(
        &mut self,
        mut entry: ContextEntry,
        summarizer: Option<&dyn LlmClient>,
        opts: &CompressOptions,
    ) -> Admission {
        debug!(tokens = entry.token_count, total = self.total_tokens(), "ContextWindow::admit: called");

        let pinned: u64 = self.entries.iter().filter(|e| e.is_header()).map(|e| e.token_count).sum();
        let mut truncated = false;
        if entry.token_count + pinned > self.budget {
            let target = self.budget.saturating_sub(pinned);
            truncate_entry(&mut entry, target);
            truncated = true;
        }

        self.entries.push(entry);
        if self.total_tokens() <= self.budget {
            return if truncated { Admission::Truncated } else { Admission::Admitted };
        }

        // Stage 1: coalesce adjacent same-fingerprint runs
        self.coalesce_repeats();
        if self.total_tokens() <= self.budget {
            return Admission::Compressed;
        }

        // Stage 2: summarize aged entries through the small tier
        if let Some(client) = summarizer {
            self.summarize_aged(client, opts).await;
            if self.total_tokens() <= self.budget {
                return Admission::Compressed;
            }
        }

        // Stage 3: drop oldest compressible entries
        self.drop_oldest_compressible();
        if truncated { Admission::Truncated } else { Admission::Compressed }
    }

    /// Collapse adjacent runs sharing a fingerprint into one summary entry
    fn coalesce_repeats(&mut self) {
        debug!(entry_count = self.entries.len(), "ContextWindow::coalesce_repeats: called");
        let mut result: Vec<ContextEntry> = Vec::with_capacity(self.entries.len());

        for entry in self.entries.drain(..) {
            let same_run = match (result.last().and_then(|e| e.fingerprint()), entry.fingerprint()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };

            if !same_run {
                result.push(entry);
                continue;
            }

            let prev = result.pop().expect("run head exists");
            let (prev_count, prev_first) = match &prev.payload {
                EntryPayload::Coalesced { count, first, .. } => (*count, *first),
                _ => (1, prev.timestamp),
            };
            let add_count = match &entry.payload {
                EntryPayload::Coalesced { count, .. } => *count,
                _ => 1,
            };
            let reason = prev.reason().unwrap_or("repeated event").to_string();
            let fingerprint = prev.fingerprint().expect("run entries carry fingerprints").to_string();

            result.push(ContextEntry::new(EntryPayload::Coalesced {
                fingerprint,
                count: prev_count + add_count,
                reason,
                first: prev_first,
                last: entry.timestamp,
            }));
        }

        self.entries = result;
    }

    /// Replace entries older than the soft age with one LLM summary
    ///
    /// Errors fall through silently; the drop stage runs either way.
    async fn summarize_aged(&mut self, client: &dyn LlmClient, opts: &CompressOptions) {
        debug!(soft_age_s = opts.soft_age_s, "ContextWindow::summarize_aged: called");
        let cutoff = Utc::now() - chrono::Duration::seconds(opts.soft_age_s);
        let newest_meta = self.newest_meta_index();

        let aged: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                e.compressible() && e.timestamp < cutoff && Some(*i) != newest_meta && *i != self.entries.len() - 1
            })
            .map(|(i, _)| i)
            .collect();

        if aged.is_empty() {
            debug!("ContextWindow::summarize_aged: nothing aged, returning");
            return;
        }
        debug!(aged_count = aged.len(), "ContextWindow::summarize_aged: summarizing");

        let body: String = aged
            .iter()
            .map(|&i| self.entries[i].render())
            .collect::<Vec<_>>()
            .join("\n");
        let request = CompletionRequest {
            system_prompt: "You compress host monitoring history. Reply with the summary only.".to_string(),
            messages: vec![ChatMessage::user(format!(
                "Summarize the following events in at most {} tokens:\n{}",
                opts.summary_target_tokens, body
            ))],
            max_tokens: opts.summary_target_tokens as u32,
        };

        let summary_text = match client.complete(request).await {
            Ok(response) => truncate_to_tokens(&response.content, opts.summary_target_tokens),
            Err(e) => {
                warn!(error = %e, "Aged-entry summarization failed, falling back to drop");
                return;
            }
        };

        let insert_at = aged[0];
        let last_ts = self.entries[*aged.last().expect("aged not empty")].timestamp;

        // Remove from the back so earlier indices stay valid
        for &i in aged.iter().rev() {
            self.entries.remove(i);
        }

        let mut summary = ContextEntry::new(EntryPayload::Summary { text: summary_text });
        summary.timestamp = last_ts;
        summary.token_count = estimate_tokens(&summary.render());
        self.entries.insert(insert_at, summary);
    }

    /// Drop oldest compressible entries until under budget
    ///
    /// Never drops the header, the newest meta analysis, or the entry
    /// admitted last; if nothing else is left, the last entry is
    /// truncated in place.
    fn drop_oldest_compressible(&mut self) {
        while self.total_tokens() > self.budget {
            let newest_meta = self.newest_meta_index();
            let last = self.entries.len().saturating_sub(1);

            let victim = self
                .entries
                .iter()
                .enumerate()
                .find(|(i, e)| e.compressible() && Some(*i) != newest_meta && *i != last)
                .map(|(i, _)| i);

            match victim {
                Some(i) => {
                    debug!(index = i, "ContextWindow::drop_oldest_compressible: dropping entry");
                    self.entries.remove(i);
                }
                None => {
                    let others: u64 = self.entries[..last].iter().map(|e| e.token_count).sum();
                    let target = self.budget.saturating_sub(others);
                    truncate_entry(&mut self.entries[last], target);
                    break;
                }
            }
        }
    }

    fn newest_meta_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.is_meta_analysis())
    }
}

/// Cut an entry's dominant text field down to a token target
///
/// The rendered form carries a timestamp prefix on top of the payload
/// text, so truncation tightens until the rendered count fits.
fn truncate_entry(entry: &mut ContextEntry, target: u64) {
    let mut text_budget = target;
    loop {
        match &mut entry.payload {
            EntryPayload::Trigger(event) => {
                event.reason = truncate_to_tokens(&event.reason, text_budget);
            }
            EntryPayload::SystemHeader { text }
            | EntryPayload::MetricSummary { text }
            | EntryPayload::MetaAnalysis { text }
            | EntryPayload::Summary { text } => {
                *text = truncate_to_tokens(text, text_budget);
            }
            EntryPayload::ReviewSummary { text, .. } => {
                *text = truncate_to_tokens(text, text_budget);
            }
            EntryPayload::ActionOutcome { summary, .. } => {
                *summary = truncate_to_tokens(summary, text_budget);
            }
            EntryPayload::Activity(_) | EntryPayload::Coalesced { .. } => {}
        }
        entry.token_count = estimate_tokens(&entry.render());

        if entry.token_count <= target || text_budget == 0 {
            break;
        }
        text_budget = text_budget.saturating_sub(entry.token_count - target);
    }
}
