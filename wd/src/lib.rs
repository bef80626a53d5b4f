//! warden - autonomous host monitoring and remediation daemon
//!
//! A tiered pipeline: cheap local probes watch the host, a
//! token-budgeted context window accumulates what they see, and
//! progressively larger language models analyze it and propose
//! remediation through a policy-gated executor.
//!
//! # Core flow
//!
//! - **Fresh observations**: the trigger loop samples metrics, scans the
//!   journal delta, and probes services every tick
//! - **Bounded memory**: the context window compresses history to stay
//!   inside its token budget
//! - **Gated actions**: every proposed remediation passes the
//!   protected-service policy and the autonomy gate before anything runs
//!
//! # Modules
//!
//! - [`trigger`] - the probe loop producing typed, debounced events
//! - [`context`] - the token-budgeted rolling window and prompt assembly
//! - [`llm`] - tiered chat-completion clients
//! - [`reason`] - the review and meta reasoners
//! - [`exec`] - policy check, autonomy gate, approval queue, runner
//! - [`issues`] - event/action correlation into long-lived issues
//! - [`orchestrator`] - wiring, timers, and shutdown

pub mod activity;
pub mod chat;
pub mod cli;
pub mod config;
pub mod context;
pub mod daemon;
pub mod exec;
pub mod issues;
pub mod llm;
pub mod logs;
pub mod notify;
pub mod orchestrator;
pub mod reason;
pub mod trigger;

// Re-export commonly used types
pub use activity::ActivityReport;
pub use config::{AutonomyLevel, Config};
pub use context::{
    Admission, AssembleOptions, CompressOptions, ContextEntry, ContextHandle, ContextManagerConfig, ContextWindow,
    EntryPayload, WindowSnapshot, assemble, estimate_tokens,
};
pub use daemon::{DaemonManager, DaemonStatus};
pub use exec::{
    ActionKind, ActionOrigin, ActionStatus, ApprovalQueue, CommandOutput, Disposition, ExecutionOutcome, Executor,
    ProposedAction, QueuedAction, Risk,
};
pub use issues::IssueTracker;
pub use llm::{ChatBackend, ChatMessage, CompletionRequest, CompletionResponse, LlmClient, LlmError, Tier};
pub use logs::{ActionRecord, DecisionRecord, JsonlLog};
pub use notify::{Notifier, NotifyPriority};
pub use reason::{
    ActionRouter, CycleOutcome, Escalation, HealthStatus, MetaReasoner, ReviewOutput, ReviewReasoner,
    parse_review_output,
};
pub use trigger::{Debouncer, RuleSet, TriggerEvent, TriggerKind, TriggerLoop};
