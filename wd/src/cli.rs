//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// warden - autonomous host monitoring and remediation daemon
#[derive(Parser)]
#[command(
    name = "wd",
    about = "Autonomous host monitoring and remediation daemon",
    version,
    after_help = "Logs are written to: ~/.local/share/warden/logs/warden.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run continuously in the foreground
    Run,

    /// Start the daemon in the background
    Start,

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Internal: run as the daemon process (used by `start`)
    #[command(hide = true)]
    RunDaemon,

    /// One-shot health check
    Check {
        /// Use the deep tier instead of the periodic reviewer
        #[arg(long)]
        deep: bool,
    },

    /// Interactive session with the deep tier
    Chat,

    /// Ask a single question
    Ask {
        /// The question
        question: String,
    },

    /// Work the approval queue
    Approve {
        #[command(subcommand)]
        action: ApproveCommand,
    },

    /// Show a log stream
    Logs {
        /// Stream to read: daemon, decisions, or actions
        stream: LogStream,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },

    /// Inspect and manage issues
    Issues {
        #[command(subcommand)]
        action: Option<IssueCommand>,
    },

    /// Send a notification through the configured sink
    Notify {
        title: String,
        body: String,
        /// low, medium, or high
        #[arg(default_value = "medium")]
        priority: crate::notify::NotifyPriority,
    },
}

/// Approval queue operations
#[derive(Subcommand)]
pub enum ApproveCommand {
    /// List queued actions
    List,
    /// Approve a pending action and execute it
    Approve { id: u64 },
    /// Reject a pending action
    Reject { id: u64 },
    /// Have the deep tier explain a queued action
    Discuss { id: u64 },
}

/// Issue operations
#[derive(Subcommand)]
pub enum IssueCommand {
    /// List issues (default)
    List,
    /// Show one issue in full
    Show { id: String },
    /// Open an issue by hand
    Create {
        title: String,
        description: String,
        #[arg(long, default_value = "warning")]
        severity: String,
    },
    /// Mark an issue resolved
    Resolve {
        id: String,
        #[arg(long, default_value = "resolved by operator")]
        note: String,
    },
    /// Close an issue permanently
    Close { id: String },
}

/// Which log stream to read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogStream {
    Daemon,
    Decisions,
    Actions,
}

impl std::str::FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daemon" => Ok(Self::Daemon),
            "decisions" => Ok(Self::Decisions),
            "actions" => Ok(Self::Actions),
            _ => Err(format!("Unknown stream: {}. Use: daemon, decisions, or actions", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["wd", "run"]);
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn test_parse_requires_command() {
        assert!(Cli::try_parse_from(["wd"]).is_err());
    }

    #[test]
    fn test_parse_check_deep() {
        let cli = Cli::parse_from(["wd", "check", "--deep"]);
        assert!(matches!(cli.command, Command::Check { deep: true }));

        let cli = Cli::parse_from(["wd", "check"]);
        assert!(matches!(cli.command, Command::Check { deep: false }));
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["wd", "ask", "why is the load high?"]);
        match cli.command {
            Command::Ask { question } => assert_eq!(question, "why is the load high?"),
            _ => panic!("expected Ask"),
        }
    }

    #[test]
    fn test_parse_approve_subcommands() {
        let cli = Cli::parse_from(["wd", "approve", "list"]);
        assert!(matches!(cli.command, Command::Approve { action: ApproveCommand::List }));

        let cli = Cli::parse_from(["wd", "approve", "approve", "3"]);
        assert!(matches!(
            cli.command,
            Command::Approve {
                action: ApproveCommand::Approve { id: 3 }
            }
        ));

        let cli = Cli::parse_from(["wd", "approve", "discuss", "7"]);
        assert!(matches!(
            cli.command,
            Command::Approve {
                action: ApproveCommand::Discuss { id: 7 }
            }
        ));
    }

    #[test]
    fn test_parse_logs_stream() {
        let cli = Cli::parse_from(["wd", "logs", "actions", "-n", "10"]);
        match cli.command {
            Command::Logs { stream, lines } => {
                assert_eq!(stream, LogStream::Actions);
                assert_eq!(lines, 10);
            }
            _ => panic!("expected Logs"),
        }

        assert!(Cli::try_parse_from(["wd", "logs", "bogus"]).is_err());
    }

    #[test]
    fn test_parse_issues_default_is_none() {
        let cli = Cli::parse_from(["wd", "issues"]);
        assert!(matches!(cli.command, Command::Issues { action: None }));

        let cli = Cli::parse_from(["wd", "issues", "show", "abc"]);
        assert!(matches!(
            cli.command,
            Command::Issues {
                action: Some(IssueCommand::Show { .. })
            }
        ));
    }

    #[test]
    fn test_parse_notify_with_default_priority() {
        let cli = Cli::parse_from(["wd", "notify", "disk", "almost full"]);
        match cli.command {
            Command::Notify { title, body, priority } => {
                assert_eq!(title, "disk");
                assert_eq!(body, "almost full");
                assert_eq!(priority, crate::notify::NotifyPriority::Medium);
            }
            _ => panic!("expected Notify"),
        }

        assert!(Cli::try_parse_from(["wd", "notify", "t", "b", "urgent"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["wd", "--config", "/tmp/w.yml", "run"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/w.yml")));
    }
}
