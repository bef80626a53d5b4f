//! Operator notifications
//!
//! Best-effort webhook delivery in the ntfy style: the body is the
//! message, title and priority travel as headers. Failures are logged
//! and never propagated.

use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Notification priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPriority {
    Low,
    Medium,
    High,
}

impl NotifyPriority {
    fn header_value(&self) -> &'static str {
        match self {
            Self::Low => "2",
            Self::Medium => "3",
            Self::High => "5",
        }
    }
}

impl std::str::FromStr for NotifyPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown priority: {}. Use: low, medium, or high", s)),
        }
    }
}

/// The notification sink
pub struct Notifier {
    url: Option<String>,
    http: Client,
}

impl Notifier {
    pub fn new(url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { url, http }
    }

    /// Disabled sink that drops everything
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Deliver a notification; best effort
    pub async fn notify(&self, title: &str, body: &str, priority: NotifyPriority) {
        let Some(url) = &self.url else {
            debug!(%title, "Notifier::notify: no sink configured, dropping");
            return;
        };

        let result = self
            .http
            .post(url)
            .header("X-Title", title)
            .header("X-Priority", priority.header_value())
            .body(body.to_string())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(%title, "Notification delivered");
            }
            Ok(response) => {
                warn!(%title, status = %response.status(), "Notification rejected by sink");
            }
            Err(e) => {
                warn!(%title, error = %e, "Notification delivery failed");
            }
        }
    }
}
