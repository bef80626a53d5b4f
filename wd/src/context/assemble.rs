//! Prompt assembly
//!
//! Turns a window snapshot plus recent metrics into a single prompt
//! bounded by the caller's token budget. The returned string always
//! estimates at or under the budget.

use chrono::Utc;
use metricstore::{AggregateFn, MetricStore};
use tracing::debug;

use crate::context::entry::EntryPayload;
use crate::context::tokens::{estimate_tokens, truncate_to_tokens};
use crate::context::window::WindowSnapshot;

/// Metrics rendered into the recent-metrics table
const TABLE_METRICS: [&str; 4] = ["cpu_pct", "mem_pct", "load1", "disk_pct"];

/// Assembly tuning
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Width of the recent-metrics table
    pub metrics_window_min: i64,
    /// Activity reports older than this are omitted
    pub activity_fresh_s: i64,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            metrics_window_min: 15,
            activity_fresh_s: 300,
        }
    }
}

/// Assemble a prompt from the snapshot, sized to `budget` tokens
///
/// Layout: system header, recent-metrics table, the freshest activity
/// report if within its window, then entries newest-first until the
/// budget is reached.
pub fn assemble(
    snapshot: &WindowSnapshot,
    metrics: Option<&MetricStore>,
    host: &str,
    budget: u64,
    opts: &AssembleOptions,
) -> String {
    debug!(budget, entries = snapshot.entries.len(), "assemble: called");
    let mut pieces: Vec<String> = Vec::new();
    // Each piece is charged one extra token to cover the joining newline
    let mut spent: u64 = 0;

    // Header first, truncated if it alone would blow the budget
    if let Some(header) = snapshot.entries.iter().find(|e| e.is_header()) {
        let text = truncate_to_tokens(&header.render(), budget.saturating_sub(1));
        spent += estimate_tokens(&text) + 1;
        pieces.push(text);
    }

    // Recent-metrics table
    if let Some(store) = metrics {
        let table = metrics_table(store, host, opts.metrics_window_min);
        if !table.is_empty() {
            let tokens = estimate_tokens(&table) + 1;
            if spent + tokens <= budget {
                spent += tokens;
                pieces.push(table);
            }
        }
    }

    // Freshest activity report
    let activity_idx = snapshot
        .entries
        .iter()
        .rposition(|e| matches!(&e.payload, EntryPayload::Activity(report) if report.is_fresh(opts.activity_fresh_s)));
    if let Some(idx) = activity_idx {
        let text = snapshot.entries[idx].render();
        let tokens = estimate_tokens(&text) + 1;
        if spent + tokens <= budget {
            spent += tokens;
            pieces.push(text);
        }
    }

    // Remaining entries, newest first, until the budget is reached
    let heading = "Recent history (newest first):";
    let heading_tokens = estimate_tokens(heading) + 1;
    if spent + heading_tokens <= budget {
        spent += heading_tokens;
        pieces.push(heading.to_string());

        for (i, entry) in snapshot.entries.iter().enumerate().rev() {
            if entry.is_header() || Some(i) == activity_idx {
                continue;
            }
            let text = entry.render();
            let tokens = estimate_tokens(&text) + 1;
            if spent + tokens > budget {
                break;
            }
            spent += tokens;
            pieces.push(text);
        }
    }

    debug!(spent, piece_count = pieces.len(), "assemble: returning");
    pieces.join("\n")
}

/// Render the last N minutes of core metrics at 1-minute resolution
fn metrics_table(store: &MetricStore, host: &str, window_min: i64) -> String {
    debug!(%host, window_min, "metrics_table: called");
    let to = Utc::now();
    let from = to - chrono::Duration::minutes(window_min);

    let mut lines: Vec<String> = Vec::new();
    for name in TABLE_METRICS {
        match store.aggregate(name, host, from, to, chrono::Duration::minutes(1), AggregateFn::Avg) {
            Ok(points) if !points.is_empty() => {
                let values: Vec<String> = points.iter().map(|p| format!("{:.1}", p.value)).collect();
                lines.push(format!("  {}: {}", name, values.join(" ")));
            }
            Ok(_) => {}
            Err(e) => {
                debug!(name, error = %e, "metrics_table: query failed, skipping metric");
            }
        }
    }

    if lines.is_empty() {
        String::new()
    } else {
        format!("Recent metrics (last {} min, 1-min avg, oldest first):\n{}", window_min, lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityReport;
    use crate::context::entry::ContextEntry;
    use crate::context::window::{CompressOptions, ContextWindow};
    use metricstore::MetricSample;

    async fn window_with_history(n: usize) -> ContextWindow {
        let mut window = ContextWindow::new(1_000_000);
        window.set_header("host web1, autonomous warden");
        for i in 0..n {
            window
                .admit(
                    ContextEntry::new(EntryPayload::MetricSummary {
                        text: format!("observation number {}", i),
                    }),
                    None,
                    &CompressOptions::default(),
                )
                .await;
        }
        window
    }

    #[tokio::test]
    async fn test_assemble_contains_header_and_newest_entries() {
        let window = window_with_history(5).await;
        let prompt = assemble(&window.snapshot(), None, "web1", 10_000, &AssembleOptions::default());

        assert!(prompt.contains("host web1"));
        assert!(prompt.contains("observation number 4"));
        // Newest first
        let pos4 = prompt.find("observation number 4").unwrap();
        let pos0 = prompt.find("observation number 0").unwrap();
        assert!(pos4 < pos0);
    }

    #[tokio::test]
    async fn test_assemble_respects_budget() {
        let window = window_with_history(200).await;
        for budget in [50u64, 200, 1000] {
            let prompt = assemble(&window.snapshot(), None, "web1", budget, &AssembleOptions::default());
            assert!(
                estimate_tokens(&prompt) <= budget,
                "prompt overflowed budget {}",
                budget
            );
        }
    }

    #[tokio::test]
    async fn test_assemble_includes_fresh_activity_once() {
        let mut window = window_with_history(2).await;
        let report = ActivityReport {
            timestamp: Utc::now(),
            cpu_pct: Some(33.0),
            mem_pct: Some(50.0),
            io_stats: vec![],
            net_stats: vec![],
        };
        window
            .admit(ContextEntry::new(EntryPayload::Activity(report)), None, &CompressOptions::default())
            .await;

        let prompt = assemble(&window.snapshot(), None, "web1", 10_000, &AssembleOptions::default());
        assert_eq!(prompt.matches("cpu: 33.0%").count(), 1);
    }

    #[tokio::test]
    async fn test_assemble_omits_stale_activity() {
        let mut window = window_with_history(1).await;
        let report = ActivityReport {
            timestamp: Utc::now() - chrono::Duration::hours(1),
            cpu_pct: Some(33.0),
            mem_pct: None,
            io_stats: vec![],
            net_stats: vec![],
        };
        window
            .admit(ContextEntry::new(EntryPayload::Activity(report)), None, &CompressOptions::default())
            .await;

        let opts = AssembleOptions {
            metrics_window_min: 15,
            activity_fresh_s: 300,
        };
        let prompt = assemble(&window.snapshot(), None, "web1", 10_000, &opts);
        // The stale report is not promoted to the activity slot above the
        // history section; it only appears in the history stream
        let heading_pos = prompt.find("Recent history").unwrap();
        let activity_pos = prompt.find("System activity").unwrap();
        assert!(activity_pos > heading_pos);
    }

    #[tokio::test]
    async fn test_assemble_renders_metrics_table() {
        let store = MetricStore::open_in_memory().unwrap();
        for i in 0..5 {
            let mut sample = MetricSample::now("web1", "cpu_pct", 10.0 * i as f64, "%");
            sample.timestamp = Utc::now() - chrono::Duration::minutes(5 - i);
            store.insert_sample(&sample).unwrap();
        }

        let window = window_with_history(1).await;
        let prompt = assemble(&window.snapshot(), Some(&store), "web1", 10_000, &AssembleOptions::default());

        assert!(prompt.contains("Recent metrics"));
        assert!(prompt.contains("cpu_pct:"));
    }
}
