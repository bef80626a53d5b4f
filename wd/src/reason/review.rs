//! Review reasoner - the medium tier
//!
//! Fires on a fixed cadence, reads a prompt-sized slice of the context
//! window, and answers with a structured verdict: direct actions for
//! the executor, or an escalation for the meta tier. Parse failures get
//! one reinforced retry, then the cycle is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::context::{ContextEntry, ContextHandle, EntryPayload};
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::logs::{DecisionRecord, JsonlLog};
use crate::reason::schema::{
    HealthStatus, REVIEW_INSTRUCTION, REVIEW_RETRY_INSTRUCTION, ReviewOutput, parse_review_output,
};
use crate::reason::{ActionRouter, Escalation};

/// What a single review cycle did
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub status: Option<HealthStatus>,
    pub assessment: String,
    pub submitted: usize,
    pub escalated: bool,
    /// The cycle was dropped before producing a verdict
    pub dropped: bool,
}

/// The periodic reviewer
pub struct ReviewReasoner {
    client: Arc<dyn LlmClient>,
    context: ContextHandle,
    router: Arc<ActionRouter>,
    escalations: mpsc::Sender<Escalation>,
    decisions: JsonlLog,
    /// Prompt budget for the review tier
    prompt_budget: u64,
    max_tokens: u32,
    escalation_cooldown: Duration,
    recent_escalations: HashMap<String, DateTime<Utc>>,
}

impl ReviewReasoner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn LlmClient>,
        context: ContextHandle,
        router: Arc<ActionRouter>,
        escalations: mpsc::Sender<Escalation>,
        decisions: JsonlLog,
        prompt_budget: u64,
        max_tokens: u32,
        escalation_cooldown_s: u64,
    ) -> Self {
        Self {
            client,
            context,
            router,
            escalations,
            decisions,
            prompt_budget,
            max_tokens,
            escalation_cooldown: Duration::seconds(escalation_cooldown_s as i64),
            recent_escalations: HashMap::new(),
        }
    }

    /// Run until shutdown; a cycle still in flight makes the next tick
    /// skip rather than queue
    pub async fn run(mut self, interval_s: u64, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_s));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_s, "Review reasoner started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.cycle().await;
                    debug!(?outcome, "Review cycle complete");
                }
                _ = shutdown.recv() => {
                    info!("Review reasoner stopping");
                    break;
                }
            }
        }
    }

    /// One review cycle
    pub async fn cycle(&mut self) -> CycleOutcome {
        debug!(prompt_budget = self.prompt_budget, "ReviewReasoner::cycle: called");
        let prompt = match self.context.assemble(self.prompt_budget).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "Context assembly failed, skipping cycle");
                return CycleOutcome {
                    dropped: true,
                    ..CycleOutcome::default()
                };
            }
        };

        let Some(output) = self.complete_and_parse(&prompt).await else {
            return CycleOutcome {
                dropped: true,
                ..CycleOutcome::default()
            };
        };

        let mut outcome = CycleOutcome {
            status: Some(output.status),
            assessment: output.assessment.clone(),
            ..CycleOutcome::default()
        };

        // Actions execute in their declared order
        for spec in output.actions.clone() {
            let action = spec.into_proposed(crate::exec::ActionOrigin::Review);
            match self.router.route(action).await {
                Ok(_) => outcome.submitted += 1,
                Err(e) => warn!(error = %e, "Action routing failed"),
            }
        }

        if output.escalate {
            outcome.escalated = self.escalate(&output).await;
        }

        self.finish_cycle(&output, &outcome).await;
        outcome
    }

    /// Call the model; retry once with a reinforced instruction on parse failure
    async fn complete_and_parse(&self, prompt: &str) -> Option<ReviewOutput> {
        debug!(prompt_chars = prompt.len(), "ReviewReasoner::complete_and_parse: called");
        let request = CompletionRequest {
            system_prompt: REVIEW_INSTRUCTION.to_string(),
            messages: vec![ChatMessage::user(prompt.to_string())],
            max_tokens: self.max_tokens,
        };

        let reply = match self.client.complete(request.clone()).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "Review call failed, skipping cycle");
                return None;
            }
        };

        match parse_review_output(&reply) {
            Ok(output) => Some(output),
            Err(first_err) => {
                debug!(error = %first_err, "Review output unparseable, retrying with reinforced instruction");
                let mut retry = request;
                retry.messages.push(ChatMessage::assistant(reply));
                retry.messages.push(ChatMessage::user(REVIEW_RETRY_INSTRUCTION.to_string()));

                match self.client.complete(retry).await {
                    Ok(response) => match parse_review_output(&response.content) {
                        Ok(output) => Some(output),
                        Err(e) => {
                            warn!(error = %e, "Review output unparseable after retry, dropping cycle");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Review retry call failed, dropping cycle");
                        None
                    }
                }
            }
        }
    }

    /// Enqueue an escalation unless its fingerprint is cooling down
    async fn escalate(&mut self, output: &ReviewOutput) -> bool {
        debug!("ReviewReasoner::escalate: called");
        let fingerprint = escalation_fingerprint(output);
        let now = Utc::now();

        if let Some(last) = self.recent_escalations.get(&fingerprint)
            && now - *last < self.escalation_cooldown
        {
            info!(%fingerprint, "Escalation suppressed by cooldown");
            return false;
        }

        let escalation = Escalation::new(
            if output.escalation_reason.is_empty() {
                output.assessment.clone()
            } else {
                output.escalation_reason.clone()
            },
            fingerprint.clone(),
        );

        match self.escalations.try_send(escalation) {
            Ok(()) => {
                self.recent_escalations.insert(fingerprint, now);
                let cooldown = self.escalation_cooldown;
                self.recent_escalations.retain(|_, t| now - *t < cooldown);
                true
            }
            Err(e) => {
                warn!(error = %e, "Escalation channel full or closed, dropping");
                false
            }
        }
    }

    async fn finish_cycle(&self, output: &ReviewOutput, outcome: &CycleOutcome) {
        debug!(status = %output.status, "ReviewReasoner::finish_cycle: called");
        let entry = ContextEntry::new(EntryPayload::ReviewSummary {
            status: output.status.to_string(),
            text: format!(
                "{} ({} action(s), {})",
                output.assessment,
                outcome.submitted,
                if outcome.escalated { "escalated" } else { "no escalation" }
            ),
        });
        if let Err(e) = self.context.admit(entry).await {
            warn!(error = %e, "Review summary admission failed");
        }

        if let Err(e) = self.decisions.append(&DecisionRecord {
            timestamp: Utc::now(),
            tier: "review".to_string(),
            status: output.status.to_string(),
            assessment: output.assessment.clone(),
            action_count: outcome.submitted,
            escalated: outcome.escalated,
        }) {
            warn!(error = %e, "Decisions log append failed");
        }
    }
}

/// Cooldown key for an escalation: the first named issue, else the reason
fn escalation_fingerprint(output: &ReviewOutput) -> String {
    match output.issues.first() {
        Some(issue) => normalize(&format!("{} {}", issue.category, issue.description)),
        None => normalize(&output.escalation_reason),
    }
}

/// First few words, lowercased and joined, for stable fingerprints
fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(6)
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutonomyLevel, ExecutorConfig};
    use crate::context::{AssembleOptions, CompressOptions, ContextManagerConfig};
    use crate::exec::{ActionStatus, ApprovalQueue, Executor};
    use crate::issues::IssueTracker;
    use crate::llm::MockLlmClient;
    use crate::notify::Notifier;
    use knowstore::KnowStore;
    use tempfile::TempDir;

    struct Rig {
        reasoner: ReviewReasoner,
        router: Arc<ActionRouter>,
        escalation_rx: mpsc::Receiver<Escalation>,
        _dir: TempDir,
    }

    fn rig(client: Arc<MockLlmClient>, autonomy: AutonomyLevel) -> Rig {
        let dir = TempDir::new().unwrap();
        let context = ContextHandle::spawn(ContextManagerConfig {
            budget_tokens: 50_000,
            compress: CompressOptions::default(),
            assemble: AssembleOptions::default(),
            snapshot_path: None,
            summarizer: None,
            metrics: None,
            host: "testhost".to_string(),
        });
        let queue = ApprovalQueue::load(
            dir.path().join("queue.jsonl"),
            dir.path().join("queue-snapshot.json"),
        )
        .unwrap();
        let executor = Arc::new(Executor::new(ExecutorConfig::default(), autonomy, queue));
        let know = Arc::new(KnowStore::open_in_memory().unwrap());
        let issues = Arc::new(IssueTracker::new(know, "testhost", 86_400));
        let router = Arc::new(ActionRouter {
            executor,
            context: context.clone(),
            issues,
            notifier: Arc::new(Notifier::disabled()),
            actions_log: JsonlLog::new(dir.path().join("actions.jsonl")),
        });
        let (tx, rx) = mpsc::channel(8);

        let reasoner = ReviewReasoner::new(
            client,
            context,
            router.clone(),
            tx,
            JsonlLog::new(dir.path().join("decisions.jsonl")),
            32_768,
            2048,
            600,
        );

        Rig {
            reasoner,
            router,
            escalation_rx: rx,
            _dir: dir,
        }
    }

    const HEALTHY: &str = r#"{"status": "healthy", "assessment": "all quiet"}"#;

    const ACTING: &str = r#"{
        "status": "attention_needed",
        "assessment": "stale artifacts on disk",
        "issues": [{"severity": "warning", "category": "disk", "description": "tmp growing"}],
        "actions": [{
            "subject": "tmp",
            "description": "inspect tmp",
            "kind": "investigation",
            "commands": ["echo inspected tmp"],
            "risk": "low"
        }]
    }"#;

    const ESCALATING: &str = r#"{
        "status": "critical",
        "assessment": "several services flapping",
        "issues": [{"severity": "critical", "category": "services", "description": "multi-service failure"}],
        "escalate": true,
        "escalation_reason": "multi-service failure"
    }"#;

    #[tokio::test]
    async fn test_healthy_cycle_records_summary() {
        let client = Arc::new(MockLlmClient::new(vec![HEALTHY]));
        let mut rig = rig(client.clone(), AutonomyLevel::AutoSafe);

        let outcome = rig.reasoner.cycle().await;
        assert_eq!(outcome.status, Some(HealthStatus::Healthy));
        assert_eq!(outcome.submitted, 0);
        assert!(!outcome.dropped);

        let snapshot = rig.reasoner.context.snapshot().await.unwrap();
        assert!(
            snapshot
                .entries
                .iter()
                .any(|e| matches!(&e.payload, EntryPayload::ReviewSummary { status, .. } if status == "healthy"))
        );
    }

    #[tokio::test]
    async fn test_low_risk_action_executes_under_auto_safe() {
        let client = Arc::new(MockLlmClient::new(vec![ACTING]));
        let mut rig = rig(client, AutonomyLevel::AutoSafe);

        let outcome = rig.reasoner.cycle().await;
        assert_eq!(outcome.submitted, 1);

        // The outcome landed in the window
        let snapshot = rig.reasoner.context.snapshot().await.unwrap();
        assert!(
            snapshot
                .entries
                .iter()
                .any(|e| matches!(&e.payload, EntryPayload::ActionOutcome { success: true, .. }))
        );
        // Nothing queued
        assert_eq!(rig.router.executor.pending_depth().await, 0);
    }

    #[tokio::test]
    async fn test_action_queued_under_suggest() {
        let client = Arc::new(MockLlmClient::new(vec![ACTING]));
        let mut rig = rig(client, AutonomyLevel::Suggest);

        rig.reasoner.cycle().await;
        let queued = rig.router.executor.list().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn test_parse_failure_retries_once_then_succeeds() {
        let client = Arc::new(MockLlmClient::new(vec!["I think everything is fine!", HEALTHY]));
        let mut rig = rig(client.clone(), AutonomyLevel::AutoSafe);

        let outcome = rig.reasoner.cycle().await;
        assert_eq!(outcome.status, Some(HealthStatus::Healthy));
        assert_eq!(client.call_count(), 2);

        // The retry carries the reinforced instruction
        let requests = client.requests();
        assert!(requests[1].messages.last().unwrap().content.contains("ONLY the JSON object"));
    }

    #[tokio::test]
    async fn test_double_parse_failure_drops_cycle() {
        let client = Arc::new(MockLlmClient::new(vec!["nope", "still nope"]));
        let mut rig = rig(client.clone(), AutonomyLevel::AutoSafe);

        let outcome = rig.reasoner.cycle().await;
        assert!(outcome.dropped);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_llm_timeout_skips_cycle() {
        let client = Arc::new(MockLlmClient::timing_out());
        let mut rig = rig(client, AutonomyLevel::AutoSafe);

        let outcome = rig.reasoner.cycle().await;
        assert!(outcome.dropped);
    }

    #[tokio::test]
    async fn test_escalation_reaches_channel_once_within_cooldown() {
        let client = Arc::new(MockLlmClient::new(vec![ESCALATING, ESCALATING]));
        let mut rig = rig(client, AutonomyLevel::AutoSafe);

        let first = rig.reasoner.cycle().await;
        assert!(first.escalated);
        let escalation = rig.escalation_rx.try_recv().unwrap();
        assert!(escalation.reason.contains("multi-service failure"));

        // Identical verdict inside the cooldown is suppressed
        let second = rig.reasoner.cycle().await;
        assert!(!second.escalated);
        assert!(rig.escalation_rx.try_recv().is_err());
    }

    #[test]
    fn test_escalation_fingerprint_stability() {
        let a = parse_review_output(ESCALATING).unwrap();
        let b = parse_review_output(ESCALATING).unwrap();
        assert_eq!(escalation_fingerprint(&a), escalation_fingerprint(&b));
        assert!(!escalation_fingerprint(&a).is_empty());
    }
}
