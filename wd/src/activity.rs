//! System activity reports
//!
//! A periodic snapshot of host utilization, rendered as a compact text
//! block for reasoner prompts. Built from whatever counters the OS
//! exposes; absent sections render as `n/a` rather than inventing
//! numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// A point-in-time utilization snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityReport {
    pub timestamp: DateTime<Utc>,
    pub cpu_pct: Option<f64>,
    pub mem_pct: Option<f64>,
    /// Per-disk usage percentages, keyed by mount point
    pub io_stats: Vec<(String, f64)>,
    /// Per-interface (received, transmitted) byte deltas
    pub net_stats: Vec<(String, u64, u64)>,
}

impl ActivityReport {
    /// Capture a report from the running system
    pub fn capture(sys: &mut System) -> Self {
        debug!("ActivityReport::capture: called");
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_pct = Some(sys.global_cpu_usage() as f64);
        let mem_pct = if sys.total_memory() > 0 {
            Some(sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0)
        } else {
            None
        };

        let disks = Disks::new_with_refreshed_list();
        let io_stats = disks
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space() - d.available_space();
                let pct = used as f64 / d.total_space() as f64 * 100.0;
                (d.mount_point().to_string_lossy().to_string(), pct)
            })
            .collect();

        let networks = Networks::new_with_refreshed_list();
        let net_stats = networks
            .iter()
            .map(|(name, data)| (name.clone(), data.received(), data.transmitted()))
            .collect();

        Self {
            timestamp: Utc::now(),
            cpu_pct,
            mem_pct,
            io_stats,
            net_stats,
        }
    }

    /// Whether the report is recent enough to include in prompts
    pub fn is_fresh(&self, max_age_s: i64) -> bool {
        (Utc::now() - self.timestamp).num_seconds() <= max_age_s
    }

    /// Render as a compact text block
    pub fn render(&self) -> String {
        let mut out = String::from("System activity:\n");

        match self.cpu_pct {
            Some(v) => out.push_str(&format!("  cpu: {:.1}%\n", v)),
            None => out.push_str("  cpu: n/a\n"),
        }
        match self.mem_pct {
            Some(v) => out.push_str(&format!("  mem: {:.1}%\n", v)),
            None => out.push_str("  mem: n/a\n"),
        }

        if self.io_stats.is_empty() {
            out.push_str("  disks: n/a\n");
        } else {
            for (mount, pct) in &self.io_stats {
                out.push_str(&format!("  disk {}: {:.1}% used\n", mount, pct));
            }
        }

        if self.net_stats.is_empty() {
            out.push_str("  net: n/a\n");
        } else {
            for (iface, rx, tx) in &self.net_stats {
                out.push_str(&format!("  net {}: rx {} B, tx {} B\n", iface, rx, tx));
            }
        }

        out
    }
}
