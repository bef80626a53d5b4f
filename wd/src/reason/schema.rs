//! Reasoner output schemas and tolerant parsing
//!
//! Model replies arrive as JSON, frequently wrapped in code fences or
//! prose. Parsing strips the wrapping and validates against typed
//! structures; anything else is a parse failure the caller retries once.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::exec::{ActionKind, ActionOrigin, ProposedAction, Risk};

/// Overall health verdict of a review cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    AttentionNeeded,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::AttentionNeeded => write!(f, "attention_needed"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One issue the reviewer called out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub category: String,
    pub description: String,
}

/// An action as the model proposes it, before it becomes a ProposedAction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub subject: String,
    pub description: String,
    pub kind: ActionKind,
    #[serde(default)]
    pub commands: Vec<String>,
    pub risk: Risk,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub rollback_plan: String,
}

impl ActionSpec {
    /// Promote to a tracked action with a fresh id
    pub fn into_proposed(self, origin: ActionOrigin) -> ProposedAction {
        let mut action = ProposedAction::new(self.kind, self.subject, self.description, self.risk, origin);
        action.commands = self.commands;
        action.rationale = self.rationale;
        action.rollback_plan = self.rollback_plan;
        action
    }
}

/// The full review verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub status: HealthStatus,
    #[serde(default)]
    pub assessment: String,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default)]
    pub escalation_reason: String,
}

/// Parse a review reply, tolerating fences and surrounding prose
pub fn parse_review_output(text: &str) -> Result<ReviewOutput, serde_json::Error> {
    let json = extract_json_object(text);
    debug!(bytes = json.len(), "parse_review_output: extracted candidate JSON");
    serde_json::from_str(json)
}

/// Pull ProposedAction specs out of free-form meta output
///
/// Every fenced block that parses as an ActionSpec, a list of them, or
/// an `{"actions": [...]}` wrapper contributes; prose is left alone.
pub fn extract_action_blocks(text: &str) -> Vec<ActionSpec> {
    let mut specs = Vec::new();

    for block in fenced_blocks(text) {
        if let Ok(spec) = serde_json::from_str::<ActionSpec>(block) {
            specs.push(spec);
        } else if let Ok(list) = serde_json::from_str::<Vec<ActionSpec>>(block) {
            specs.extend(list);
        } else if let Ok(wrapper) = serde_json::from_str::<ActionsWrapper>(block) {
            specs.extend(wrapper.actions);
        }
    }

    specs
}

#[derive(Deserialize)]
struct ActionsWrapper {
    actions: Vec<ActionSpec>,
}

/// The outermost `{...}` of a reply, fences stripped
fn extract_json_object(text: &str) -> &str {
    let stripped = text.trim();
    let start = stripped.find('{');
    let end = stripped.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => &stripped[s..=e],
        _ => stripped,
    }
}

/// Contents of ``` fenced blocks, language tags dropped
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let Some(newline) = after_open.find('\n') else { break };
        let body_start = &after_open[newline + 1..];
        let Some(close) = body_start.find("```") else { break };
        blocks.push(body_start[..close].trim());
        rest = &body_start[close + 3..];
    }

    blocks
}

/// The fixed instruction appended to every review prompt
pub const REVIEW_INSTRUCTION: &str = "\
You are the periodic reviewer of a single Linux host. Analyze the context above \
and reply with ONLY a JSON object, no prose, matching this schema:\n\
{\n\
  \"status\": \"healthy\" | \"attention_needed\" | \"critical\",\n\
  \"assessment\": \"one paragraph summary\",\n\
  \"issues\": [{\"severity\": \"info|warning|critical\", \"category\": \"...\", \"description\": \"...\"}],\n\
  \"actions\": [{\"subject\": \"...\", \"description\": \"...\", \"kind\": \"service_restart|cleanup|investigation|config_change|rebuild\", \"commands\": [\"...\"], \"risk\": \"low|medium|high\", \"rationale\": \"...\", \"rollback_plan\": \"...\"}],\n\
  \"escalate\": false,\n\
  \"escalation_reason\": \"\"\n\
}\n\
Propose actions only when the context justifies them. Escalate when the situation \
needs deeper analysis than you can provide.";

/// Appended after a parse failure for the single retry
pub const REVIEW_RETRY_INSTRUCTION: &str = "\
Your previous reply was not valid JSON for the required schema. \
Reply again with ONLY the JSON object, starting with '{' and ending with '}'.";
