//! Policy-gated action executor
//!
//! Gatekeeper for every state-changing operation. Each proposed action
//! passes the protected-service policy, then the autonomy gate, and
//! either runs immediately or lands in the persistent approval queue.

mod action;
mod policy;
mod queue;
mod runner;

pub use action::{ActionKind, ActionOrigin, ActionStatus, ProposedAction, QueuedAction, Risk};
pub use policy::{GateDecision, PolicyViolation, autonomy_gate, policy_check};
pub use queue::{ApprovalQueue, QueueError};
pub use runner::{CommandOutput, run_shell, service_active};

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AutonomyLevel, ExecutorConfig};

/// Result of actually running an action's commands
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub summary: String,
    pub outputs: Vec<CommandOutput>,
}

impl ExecutionOutcome {
    fn failed(summary: impl Into<String>, outputs: Vec<CommandOutput>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            outputs,
        }
    }
}

/// What the executor did with a submission
#[derive(Debug)]
pub enum Disposition {
    /// Ran immediately; outcome attached
    Executed(ExecutionOutcome),
    /// Parked in the approval queue
    Queued { queue_id: u64 },
    /// Policy rejection; terminal
    Rejected { reason: String },
}

/// The action gatekeeper
///
/// The queue mutex is held only for queue bookkeeping, never across
/// shell execution.
pub struct Executor {
    config: ExecutorConfig,
    autonomy: AutonomyLevel,
    queue: Mutex<ApprovalQueue>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, autonomy: AutonomyLevel, queue: ApprovalQueue) -> Self {
        Self {
            config,
            autonomy,
            queue: Mutex::new(queue),
        }
    }

    pub fn autonomy(&self) -> AutonomyLevel {
        self.autonomy
    }

    /// Submit a proposed action through policy check and autonomy gate
    pub async fn submit(&self, action: ProposedAction) -> Result<Disposition, QueueError> {
        debug!(action_id = %action.id, kind = %action.kind, risk = %action.risk, "Executor::submit: called");

        if let Err(violation) = policy_check(&action, &self.config.protected_services) {
            warn!(action_id = %action.id, %violation, "Action rejected by policy");
            return Ok(Disposition::Rejected {
                reason: violation.to_string(),
            });
        }

        let mut decision = autonomy_gate(action.risk, self.autonomy);

        // Backpressure: a deep pending queue pauses auto-execution
        let depth = self.queue.lock().await.pending_depth();
        if depth >= self.config.queue_depth_limit {
            warn!(depth, limit = self.config.queue_depth_limit, "Queue depth limit reached, forcing pending");
            decision = GateDecision::Queue;
        }

        match decision {
            GateDecision::Queue => {
                let queue_id = self.queue.lock().await.enqueue(action)?;
                info!(queue_id, "Action queued for approval");
                Ok(Disposition::Queued { queue_id })
            }
            GateDecision::Execute => {
                let outcome = self.execute(&action).await;
                info!(action_id = %action.id, success = outcome.success, "Action executed");
                Ok(Disposition::Executed(outcome))
            }
        }
    }

    /// Approve a queued action and execute it immediately
    pub async fn approve(&self, id: u64) -> Result<ExecutionOutcome, QueueError> {
        debug!(id, "Executor::approve: called");

        let entry = {
            let mut queue = self.queue.lock().await;
            queue.set_status(id, ActionStatus::Approved)?;
            queue.get(id).cloned().ok_or(QueueError::NotFound(id))?
        };

        // Config may have changed since the action was queued
        if let Err(violation) = policy_check(&entry.action, &self.config.protected_services) {
            let outcome = ExecutionOutcome::failed(violation.to_string(), Vec::new());
            self.queue.lock().await.set_status(id, ActionStatus::Failed)?;
            return Ok(outcome);
        }

        // A restart target that recovered while queued needs no restart
        if entry.action.kind == ActionKind::ServiceRestart
            && service_active(&entry.action.subject).await == Some(true)
        {
            info!(id, subject = %entry.action.subject, "Restart target already active, skipping");
            let outcome = ExecutionOutcome {
                success: true,
                summary: format!("{} already active, restart skipped", entry.action.subject),
                outputs: Vec::new(),
            };
            self.queue.lock().await.set_status(id, ActionStatus::Executed)?;
            return Ok(outcome);
        }

        let outcome = self.execute(&entry.action).await;
        let status = if outcome.success { ActionStatus::Executed } else { ActionStatus::Failed };
        self.queue.lock().await.set_status(id, status)?;
        Ok(outcome)
    }

    /// Reject a queued action; terminal
    pub async fn reject(&self, id: u64) -> Result<(), QueueError> {
        debug!(id, "Executor::reject: called");
        self.queue.lock().await.set_status(id, ActionStatus::Rejected)
    }

    pub async fn get(&self, id: u64) -> Option<QueuedAction> {
        debug!(id, "Executor::get: called");
        self.queue.lock().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<QueuedAction> {
        debug!("Executor::list: called");
        self.queue.lock().await.list().to_vec()
    }

    pub async fn pending_depth(&self) -> usize {
        debug!("Executor::pending_depth: called");
        self.queue.lock().await.pending_depth()
    }

    /// Dispatch by action kind and run the commands
    async fn execute(&self, action: &ProposedAction) -> ExecutionOutcome {
        debug!(action_id = %action.id, kind = %action.kind, "Executor::execute: called");
        let timeout = Duration::from_secs(self.config.command_timeout_s);

        match action.kind {
            ActionKind::ServiceRestart => {
                let command = format!("systemctl restart {}", action.subject);
                self.run_single(&command, timeout).await
            }
            ActionKind::Cleanup => {
                let command = self.config.cleanup_command.clone();
                self.run_single(&command, timeout).await
            }
            ActionKind::Rebuild => self.run_rebuild(timeout).await,
            ActionKind::Investigation | ActionKind::ConfigChange => self.run_commands(&action.commands, timeout).await,
        }
    }

    async fn run_single(&self, command: &str, timeout: Duration) -> ExecutionOutcome {
        debug!(%command, "Executor::run_single: called");
        match run_shell(command, timeout).await {
            Ok(output) => {
                let success = output.success();
                let summary = if success {
                    format!("{} succeeded", command)
                } else if output.timed_out {
                    format!("{} timed out", command)
                } else {
                    format!("{} exited {:?}", command, output.exit_code)
                };
                ExecutionOutcome {
                    success,
                    summary,
                    outputs: vec![output],
                }
            }
            Err(e) => ExecutionOutcome::failed(format!("{} failed to spawn: {}", command, e), Vec::new()),
        }
    }

    async fn run_commands(&self, commands: &[String], timeout: Duration) -> ExecutionOutcome {
        debug!(command_count = commands.len(), "Executor::run_commands: called");
        let mut outputs = Vec::new();
        for command in commands {
            match run_shell(command, timeout).await {
                Ok(output) => {
                    let ok = output.success();
                    outputs.push(output);
                    if !ok {
                        return ExecutionOutcome::failed(format!("{} failed, stopping", command), outputs);
                    }
                }
                Err(e) => {
                    return ExecutionOutcome::failed(format!("{} failed to spawn: {}", command, e), outputs);
                }
            }
        }
        ExecutionOutcome {
            success: true,
            summary: format!("{} command(s) succeeded", outputs.len()),
            outputs,
        }
    }

    /// Rebuilds rehearse first; the apply step only runs after a clean dry-run
    async fn run_rebuild(&self, timeout: Duration) -> ExecutionOutcome {
        debug!("Executor::run_rebuild: called");
        let dry = self.run_single(&self.config.rebuild_dry_run_command.clone(), timeout).await;
        debug!(dry_run_success = dry.success, "Executor::run_rebuild: dry-run finished");
        if !dry.success {
            warn!("Rebuild dry-run failed, aborting without touching system state");
            return ExecutionOutcome::failed(format!("dry-run failed: {}", dry.summary), dry.outputs);
        }

        let mut apply = self.run_single(&self.config.rebuild_command.clone(), timeout).await;
        apply.outputs.splice(0..0, dry.outputs);
        apply
    }
}
