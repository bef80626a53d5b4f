//! Small-model log line classifier
//!
//! Best effort: lines the rules did not match are shown to the trigger
//! tier, which answers with one word. Errors and timeouts degrade to
//! rule-only classification.

use std::sync::Arc;

use knowstore::Severity;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

/// Classifier verdict vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    Ignore,
    Noise,
    Warning,
    Critical,
}

impl LineVerdict {
    /// Parse the first recognizable word of a model reply
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?.trim_matches(|c: char| !c.is_alphabetic());
        match first.to_lowercase().as_str() {
            "ignore" => Some(Self::Ignore),
            "noise" => Some(Self::Noise),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Severity this verdict maps to, if it warrants an event
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Self::Ignore | Self::Noise => None,
            Self::Warning => Some(Severity::Warning),
            Self::Critical => Some(Severity::Critical),
        }
    }
}

/// Classifies unmatched log lines through the trigger tier
pub struct LineClassifier {
    client: Arc<dyn LlmClient>,
    max_lines: usize,
}

impl LineClassifier {
    pub fn new(client: Arc<dyn LlmClient>, max_lines: usize) -> Self {
        Self { client, max_lines }
    }

    /// Classify up to `max_lines` lines; failures yield no verdict
    pub async fn classify(&self, lines: &[String]) -> Vec<(String, LineVerdict)> {
        let mut verdicts = Vec::new();

        for line in lines.iter().take(self.max_lines) {
            let request = CompletionRequest {
                system_prompt: "You triage journal lines from a Linux host. \
                                Reply with exactly one word: ignore, noise, warning, or critical."
                    .to_string(),
                messages: vec![ChatMessage::user(line.clone())],
                max_tokens: 8,
            };

            match self.client.complete(request).await {
                Ok(response) => match LineVerdict::parse(&response.content) {
                    Some(verdict) => {
                        debug!(%line, ?verdict, "LineClassifier::classify: verdict");
                        verdicts.push((line.clone(), verdict));
                    }
                    None => {
                        warn!(reply = %response.content, "Classifier reply unrecognized, skipping line");
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Classifier call failed, degrading to rule-only");
                    break;
                }
            }
        }

        verdicts
    }
}
