//! Meta reasoner - the large tier
//!
//! Invoked on escalation, deep checks, and conversations. Gets the
//! biggest prompt budget, plus semantic-store context keyed by the
//! matter at hand. Free-form reasoning; any fenced action blocks in the
//! reply are routed through the executor.

use std::sync::Arc;

use chrono::Utc;
use eyre::{Result, eyre};
use knowstore::KnowStore;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::context::{ContextEntry, ContextHandle, EntryPayload, truncate_to_tokens};
use crate::exec::QueuedAction;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::logs::{DecisionRecord, JsonlLog};
use crate::reason::schema::extract_action_blocks;
use crate::reason::{ActionRouter, Escalation};

/// Token reserve carved out of the prompt budget for store lookups
const STORE_CONTEXT_TOKENS: u64 = 2048;

/// The fixed instruction for deep analysis
const META_INSTRUCTION: &str = "\
You are the deep analyst for a single Linux host, called in when the periodic \
reviewer needs help. Reason freely about root causes and remediation. When you \
want something done, emit one or more fenced json blocks, each an object:\n\
{\"subject\": \"...\", \"description\": \"...\", \"kind\": \"service_restart|cleanup|investigation|config_change|rebuild\", \"commands\": [\"...\"], \"risk\": \"low|medium|high\", \"rationale\": \"...\", \"rollback_plan\": \"...\"}\n\
Anything outside fenced blocks is treated as explanation for the operator.";

/// The instruction for interactive sessions
const SESSION_INSTRUCTION: &str = "\
You are warden, the resident autonomous administrator of this host. Answer the \
operator directly and concretely, drawing on the system context you carry.";

/// The on-demand deep tier
pub struct MetaReasoner {
    client: Arc<dyn LlmClient>,
    context: ContextHandle,
    router: Arc<ActionRouter>,
    know: Arc<KnowStore>,
    decisions: JsonlLog,
    prompt_budget: u64,
    max_tokens: u32,
}

impl MetaReasoner {
    pub fn new(
        client: Arc<dyn LlmClient>,
        context: ContextHandle,
        router: Arc<ActionRouter>,
        know: Arc<KnowStore>,
        decisions: JsonlLog,
        prompt_budget: u64,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            context,
            router,
            know,
            decisions,
            prompt_budget,
            max_tokens,
        }
    }

    /// Worker loop draining the escalation channel
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Escalation>, mut shutdown: broadcast::Receiver<()>) {
        info!("Meta reasoner started");
        loop {
            tokio::select! {
                escalation = rx.recv() => {
                    match escalation {
                        Some(escalation) => {
                            info!(reason = %escalation.reason, "Handling escalation");
                            if let Err(e) = self.analyze(&escalation.reason).await {
                                warn!(error = %e, "Escalation analysis failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    info!("Meta reasoner stopping");
                    break;
                }
            }
        }
    }

    /// Deep analysis of a situation; routes any proposed actions
    pub async fn analyze(&self, reason: &str) -> Result<String> {
        debug!(%reason, "MetaReasoner::analyze: called");

        let prompt = self
            .context
            .assemble(self.prompt_budget.saturating_sub(STORE_CONTEXT_TOKENS))
            .await
            .map_err(|e| eyre!("Context assembly failed: {}", e))?;
        let store_context = self.store_context(reason);

        let request = CompletionRequest {
            system_prompt: META_INSTRUCTION.to_string(),
            messages: vec![ChatMessage::user(format!(
                "{}\n{}\nMatter under analysis: {}",
                prompt, store_context, reason
            ))],
            max_tokens: self.max_tokens,
        };

        let response = self.client.complete(request).await?;
        let analysis = response.content;

        let specs = extract_action_blocks(&analysis);
        let mut submitted = 0;
        for spec in specs {
            let action = spec.into_proposed(crate::exec::ActionOrigin::Meta);
            match self.router.route(action).await {
                Ok(_) => submitted += 1,
                Err(e) => warn!(error = %e, "Meta action routing failed"),
            }
        }

        if let Err(e) = self
            .context
            .admit(ContextEntry::new(EntryPayload::MetaAnalysis {
                text: analysis.clone(),
            }))
            .await
        {
            warn!(error = %e, "Meta analysis admission failed");
        }

        if let Err(e) = self.decisions.append(&DecisionRecord {
            timestamp: Utc::now(),
            tier: "meta".to_string(),
            status: "analyzed".to_string(),
            assessment: truncate_to_tokens(&analysis, 128),
            action_count: submitted,
            escalated: false,
        }) {
            warn!(error = %e, "Decisions log append failed");
        }

        Ok(analysis)
    }

    /// Answer a one-shot operator question; no actions are taken
    pub async fn ask(&self, question: &str) -> Result<String> {
        debug!(%question, "MetaReasoner::ask: called");
        let prompt = self
            .context
            .assemble(self.prompt_budget.saturating_sub(STORE_CONTEXT_TOKENS))
            .await
            .map_err(|e| eyre!("Context assembly failed: {}", e))?;
        let store_context = self.store_context(question);

        let request = CompletionRequest {
            system_prompt: SESSION_INSTRUCTION.to_string(),
            messages: vec![ChatMessage::user(format!(
                "{}\n{}\nOperator question: {}",
                prompt, store_context, question
            ))],
            max_tokens: self.max_tokens,
        };

        Ok(self.client.complete(request).await?.content)
    }

    /// One turn of an interactive session
    ///
    /// Session history lives with the caller, outside the global window;
    /// the prompt is the system header plus the session so far.
    pub async fn session_turn(&self, history: &[ChatMessage], user_turn: &str) -> Result<String> {
        debug!(history_len = history.len(), "MetaReasoner::session_turn: called");
        let header = self.header_text().await;
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(user_turn.to_string()));

        let request = CompletionRequest {
            system_prompt: format!("{}\n\n{}", SESSION_INSTRUCTION, header),
            messages,
            max_tokens: self.max_tokens,
        };

        Ok(self.client.complete(request).await?.content)
    }

    /// Explain a queued action to the operator
    pub async fn discuss(&self, entry: &QueuedAction) -> Result<String> {
        debug!(queue_id = entry.queue_id, "MetaReasoner::discuss: called");
        let action_json = serde_json::to_string_pretty(&entry.action)?;
        let question = format!(
            "This action is queued as #{} awaiting approval:\n{}\nExplain what it does, its risk, and whether to approve it.",
            entry.queue_id, action_json
        );
        self.ask(&question).await
    }

    /// Semantic-store lookups for the matter at hand, token-capped
    fn store_context(&self, text: &str) -> String {
        debug!("MetaReasoner::store_context: called");
        let mut sections = Vec::new();

        match self.know.query_issues(text, 5) {
            Ok(issues) if !issues.is_empty() => {
                let lines: Vec<String> = issues
                    .iter()
                    .map(|i| format!("  [{}] {} ({}, {} events)", i.status, i.title, i.severity, i.event_count))
                    .collect();
                sections.push(format!("Similar past issues:\n{}", lines.join("\n")));
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Issue lookup failed, omitting"),
        }

        match self.know.query_knowledge(text, 5) {
            Ok(entries) if !entries.is_empty() => {
                let lines: Vec<String> = entries.iter().map(|k| format!("  {}: {}", k.topic, k.content)).collect();
                sections.push(format!("Operator knowledge:\n{}", lines.join("\n")));
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Knowledge lookup failed, omitting"),
        }

        truncate_to_tokens(&sections.join("\n"), STORE_CONTEXT_TOKENS)
    }

    async fn header_text(&self) -> String {
        debug!("MetaReasoner::header_text: called");
        match self.context.snapshot().await {
            Ok(snapshot) => snapshot
                .entries
                .iter()
                .find(|e| e.is_header())
                .map(|e| e.render())
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutonomyLevel, ExecutorConfig};
    use crate::context::{AssembleOptions, CompressOptions, ContextManagerConfig};
    use crate::exec::{ApprovalQueue, Executor};
    use crate::issues::IssueTracker;
    use crate::llm::MockLlmClient;
    use crate::notify::Notifier;
    use knowstore::{Issue, KnowledgeEntry, Severity};
    use tempfile::TempDir;

    struct Rig {
        meta: MetaReasoner,
        know: Arc<KnowStore>,
        context: ContextHandle,
        executor: Arc<Executor>,
        _dir: TempDir,
    }

    fn rig(client: Arc<MockLlmClient>) -> Rig {
        let dir = TempDir::new().unwrap();
        let context = ContextHandle::spawn(ContextManagerConfig {
            budget_tokens: 100_000,
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
        let executor = Arc::new(Executor::new(
            ExecutorConfig::default(),
            AutonomyLevel::AutoSafe,
            queue,
        ));
        let know = Arc::new(KnowStore::open_in_memory().unwrap());
        let issues = Arc::new(IssueTracker::new(know.clone(), "testhost", 86_400));
        let router = Arc::new(ActionRouter {
            executor: executor.clone(),
            context: context.clone(),
            issues,
            notifier: Arc::new(Notifier::disabled()),
            actions_log: JsonlLog::new(dir.path().join("actions.jsonl")),
        });

        let meta = MetaReasoner::new(
            client,
            context.clone(),
            router,
            know.clone(),
            JsonlLog::new(dir.path().join("decisions.jsonl")),
            131_072,
            4096,
        );

        Rig {
            meta,
            know,
            context,
            executor,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_analyze_routes_action_blocks_and_pins_analysis() {
        let reply = "Root cause: stale artifacts.\n\n```json\n{\"subject\": \"tmp\", \"description\": \"inspect\", \"kind\": \"investigation\", \"commands\": [\"echo dug in\"], \"risk\": \"low\"}\n```\nDone.";
        let client = Arc::new(MockLlmClient::new(vec![reply]));
        let rig = rig(client);

        let analysis = rig.meta.analyze("multi-service failure").await.unwrap();
        assert!(analysis.contains("Root cause"));

        let snapshot = rig.context.snapshot().await.unwrap();
        assert!(snapshot.entries.iter().any(|e| e.is_meta_analysis()));
        assert!(
            snapshot
                .entries
                .iter()
                .any(|e| matches!(&e.payload, EntryPayload::ActionOutcome { success: true, .. }))
        );
    }

    #[tokio::test]
    async fn test_analyze_prompt_carries_store_context() {
        let mut issue = Issue::new("testhost", "nginx.service", "nginx crash loop", "restarting", Severity::Critical);
        issue.event_count = 4;

        let client = Arc::new(MockLlmClient::new(vec!["noted"]));
        let rig = rig(client.clone());
        rig.know.upsert_issue(&issue).unwrap();
        rig.know
            .upsert_knowledge(&KnowledgeEntry::new("nginx", "check config before restart"))
            .unwrap();

        rig.meta.analyze("nginx crash loop again").await.unwrap();

        let request = &client.requests()[0];
        let body = &request.messages[0].content;
        assert!(body.contains("Similar past issues"));
        assert!(body.contains("nginx crash loop"));
        assert!(body.contains("Operator knowledge"));
    }

    #[tokio::test]
    async fn test_ask_takes_no_actions() {
        let reply = "You could run this:\n```json\n{\"subject\": \"x\", \"description\": \"y\", \"kind\": \"cleanup\", \"risk\": \"low\"}\n```";
        let client = Arc::new(MockLlmClient::new(vec![reply]));
        let rig = rig(client);

        let answer = rig.meta.ask("how do I free disk space?").await.unwrap();
        assert!(answer.contains("You could run"));

        // Nothing executed, nothing queued
        assert_eq!(rig.executor.list().await.len(), 0);
        let snapshot = rig.context.snapshot().await.unwrap();
        assert!(
            !snapshot
                .entries
                .iter()
                .any(|e| matches!(&e.payload, EntryPayload::ActionOutcome { .. }))
        );
    }

    #[tokio::test]
    async fn test_session_turn_carries_header_and_history() {
        let client = Arc::new(MockLlmClient::new(vec!["hello operator"]));
        let rig = rig(client.clone());
        rig.context.set_header("host testhost, 8 cores").await.unwrap();

        let history = vec![
            ChatMessage::user("what host is this?"),
            ChatMessage::assistant("testhost"),
        ];
        let reply = rig.meta.session_turn(&history, "and how many cores?").await.unwrap();
        assert_eq!(reply, "hello operator");

        let request = &client.requests()[0];
        assert!(request.system_prompt.contains("8 cores"));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].content, "and how many cores?");
    }
}
