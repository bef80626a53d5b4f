//! Protected-service policy and the autonomy gate
//!
//! The policy check is the hard floor under every autonomy level: no
//! command that names a protected service together with a destructive
//! verb ever runs, no matter who proposed it.

use thiserror::Error;
use tracing::debug;

use crate::config::AutonomyLevel;
use crate::exec::action::{ProposedAction, Risk};

/// Verbs that count as destructive when aimed at a protected service
const DESTRUCTIVE_VERBS: [&str; 6] = ["stop", "disable", "mask", "kill", "pkill", "killall"];

/// A rejected action, with the offending command
#[derive(Debug, Clone, Error)]
#[error("Command '{command}' would {verb} protected service '{service}'")]
pub struct PolicyViolation {
    pub command: String,
    pub service: String,
    pub verb: String,
}

/// Check every command of an action against the protected set
pub fn policy_check(action: &ProposedAction, protected: &[String]) -> Result<(), PolicyViolation> {
    debug!(action_id = %action.id, "policy_check: called");
    for command in &action.commands {
        if let Some(violation) = check_command(command, protected) {
            return Err(violation);
        }
    }
    Ok(())
}

fn check_command(command: &str, protected: &[String]) -> Option<PolicyViolation> {
    let tokens: Vec<&str> = command.split_whitespace().collect();

    let verb = tokens.iter().find(|t| DESTRUCTIVE_VERBS.contains(&t.to_lowercase().as_str()))?;

    let service = protected.iter().find(|svc| {
        let bare = svc.trim_end_matches(".service");
        tokens
            .iter()
            .any(|t| t.trim_end_matches(".service") == bare)
    })?;

    Some(PolicyViolation {
        command: command.to_string(),
        service: service.clone(),
        verb: verb.to_string(),
    })
}

/// What the autonomy gate decided for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Run it now
    Execute,
    /// Park it in the approval queue
    Queue,
}

/// Apply the autonomy level to an action's risk
pub fn autonomy_gate(risk: Risk, level: AutonomyLevel) -> GateDecision {
    let decision = match level {
        AutonomyLevel::Observe | AutonomyLevel::Suggest => GateDecision::Queue,
        AutonomyLevel::AutoSafe => {
            if risk == Risk::Low {
                GateDecision::Execute
            } else {
                GateDecision::Queue
            }
        }
        AutonomyLevel::AutoFull => {
            if risk <= Risk::Medium {
                GateDecision::Execute
            } else {
                GateDecision::Queue
            }
        }
    };
    debug!(%risk, %level, ?decision, "autonomy_gate: decided");
    decision
}
