//! Fingerprint debouncing
//!
//! A candidate whose fingerprint was admitted within the window is
//! dropped, so a flapping condition becomes one event per window rather
//! than one per tick.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Sliding-window fingerprint filter
pub struct Debouncer {
    window: Duration,
    seen: HashMap<String, DateTime<Utc>>,
}

impl Debouncer {
    pub fn new(window_s: u64) -> Self {
        Self {
            window: Duration::seconds(window_s as i64),
            seen: HashMap::new(),
        }
    }

    /// Admit the fingerprint if its last admission is outside the window
    ///
    /// Admission records the timestamp; a dropped candidate does not
    /// extend the window.
    pub fn admit(&mut self, fingerprint: &str, at: DateTime<Utc>) -> bool {
        if let Some(last) = self.seen.get(fingerprint)
            && at - *last < self.window
        {
            debug!(%fingerprint, "Debouncer::admit: suppressed");
            return false;
        }
        self.seen.insert(fingerprint.to_string(), at);
        true
    }

    /// Drop expired records to keep the map bounded
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let before = self.seen.len();
        let window = self.window;
        self.seen.retain(|_, last| now - *last < window);
        debug!(before, after = self.seen.len(), "Debouncer::prune: done");
    }

    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}
