//! Journal pattern rules
//!
//! An ordered rule list; the first matching rule wins. Each rule carries
//! a severity and a subject template where `$1`..`$9` expand to capture
//! groups.

use eyre::{Context, Result};
use knowstore::Severity;
use regex::Regex;
use tracing::debug;

use crate::config::LogRuleConfig;

/// One compiled journal rule
pub struct LogRule {
    pub id: String,
    pub pattern: Regex,
    pub severity: Severity,
    pub subject: String,
}

/// A journal line matched by a rule
#[derive(Debug, Clone)]
pub struct MatchedLine {
    pub rule_id: String,
    pub severity: Severity,
    pub subject: String,
    pub line: String,
}

/// The ordered rule list
pub struct RuleSet {
    rules: Vec<LogRule>,
}

impl RuleSet {
    /// The built-in rules every host gets
    pub fn builtin() -> Self {
        let rules = vec![
            rule("oom-kill", r"Out of memory: Killed process \d+ \(([^)]+)\)", Severity::Critical, "$1"),
            rule("oom-invoked", r"invoked oom-killer", Severity::Critical, "memory"),
            rule("fs-readonly", r"Remounting filesystem read-only", Severity::Critical, "filesystem"),
            rule("io-error", r"I/O error, dev (\w+)", Severity::Critical, "$1"),
            rule("unit-failed", r"(\S+\.(?:service|mount|socket)): Failed with result", Severity::Warning, "$1"),
            rule("failed-start", r"Failed to start (.+?)\.?$", Severity::Warning, "$1"),
            rule("segfault", r"(\S+)\[\d+\]: segfault at", Severity::Warning, "$1"),
            rule("disk-space", r"No space left on device", Severity::Critical, "filesystem"),
            rule("auth-fail", r"Failed password for (?:invalid user )?(\S+)", Severity::Info, "auth"),
        ];
        Self { rules }
    }

    /// Built-in rules followed by operator-configured ones
    pub fn with_config(extra: &[LogRuleConfig]) -> Result<Self> {
        debug!(extra_count = extra.len(), "RuleSet::with_config: called");
        let mut set = Self::builtin();
        for (i, cfg) in extra.iter().enumerate() {
            let pattern = Regex::new(&cfg.pattern).context(format!("Invalid log rule pattern: {}", cfg.pattern))?;
            let severity: Severity = cfg
                .severity
                .parse()
                .map_err(|e: String| eyre::eyre!(e))
                .context("Invalid log rule severity")?;
            set.rules.push(LogRule {
                id: format!("custom-{}", i),
                pattern,
                severity,
                subject: cfg.subject.clone(),
            });
        }
        Ok(set)
    }

    /// Match a line against the rules, first hit wins
    pub fn match_line(&self, line: &str) -> Option<MatchedLine> {
        for rule in &self.rules {
            if let Some(captures) = rule.pattern.captures(line) {
                let subject = expand_subject(&rule.subject, &captures);
                debug!(rule_id = %rule.id, %subject, "match_line: rule hit");
                return Some(MatchedLine {
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    subject,
                    line: line.to_string(),
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn rule(id: &str, pattern: &str, severity: Severity, subject: &str) -> LogRule {
    LogRule {
        id: id.to_string(),
        pattern: Regex::new(pattern).expect("built-in rule pattern is valid"),
        severity,
        subject: subject.to_string(),
    }
}

/// Expand `$1`..`$9` in a subject template from regex captures
fn expand_subject(template: &str, captures: &regex::Captures<'_>) -> String {
    let mut result = template.to_string();
    for i in (1..=9).rev() {
        let placeholder = format!("${}", i);
        if result.contains(&placeholder) {
            let value = captures.get(i).map(|m| m.as_str()).unwrap_or("");
            result = result.replace(&placeholder, value);
        }
    }
    result
}
