//! warden - autonomous host monitoring and remediation daemon
//!
//! CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use wardend::cli::{ApproveCommand, Cli, Command, IssueCommand, LogStream};
use wardend::config::Config;
use wardend::daemon::DaemonManager;
use wardend::logs::JsonlLog;
use wardend::notify::Notifier;
use wardend::{chat, orchestrator};

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("logs")
}

fn daemon_log_path() -> PathBuf {
    log_dir().join("warden.log")
}

fn setup_logging(verbose: bool, to_file: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_file {
        std::fs::create_dir_all(log_dir()).context("Failed to create log directory")?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(daemon_log_path())
            .context("Failed to open log file")?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code: u8 = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let to_file = matches!(cli.command, Command::RunDaemon);
    if let Err(e) = setup_logging(cli.verbose, to_file) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(2);
    }

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            ExitCode::from(2)
        }
    }
}

#[tokio::main]
async fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run => orchestrator::run(config).await,

        Command::RunDaemon => {
            DaemonManager::new().register_self()?;
            orchestrator::run(config).await
        }

        Command::Start => {
            let pid = DaemonManager::new().start()?;
            println!("Daemon started (pid {})", pid);
            Ok(())
        }

        Command::Stop => DaemonManager::new().stop(),

        Command::Status => {
            let status = DaemonManager::new().status();
            if status.running {
                println!("{} (pid {})", "running".green(), status.pid.unwrap_or_default());
            } else {
                println!("{}", "not running".yellow());
            }
            println!("  autonomy: {}", config.autonomy_level);
            println!("  data dir: {}", config.data_dir().display());
            Ok(())
        }

        Command::Check { deep } => {
            let verdict = orchestrator::check(config, deep).await?;
            println!("{}", verdict);
            Ok(())
        }

        Command::Chat => {
            let components = orchestrator::build(config)?;
            orchestrator::announce_host(&components).await?;
            chat::run_chat(&components.meta).await
        }

        Command::Ask { question } => {
            let components = orchestrator::build(config)?;
            orchestrator::announce_host(&components).await?;
            let answer = components.meta.ask(&question).await?;
            println!("{}", answer);
            Ok(())
        }

        Command::Approve { action } => handle_approve(config, action).await,

        Command::Logs { stream, lines } => handle_logs(config, stream, lines),

        Command::Issues { action } => handle_issues(config, action.unwrap_or(IssueCommand::List)),

        Command::Notify { title, body, priority } => {
            Notifier::new(config.notify_url.clone()).notify(&title, &body, priority).await;
            Ok(())
        }
    }
}

async fn handle_approve(config: Config, action: ApproveCommand) -> Result<()> {
    let components = orchestrator::build(config)?;

    match action {
        ApproveCommand::List => {
            let entries = components.executor.list().await;
            if entries.is_empty() {
                println!("approval queue is empty");
                return Ok(());
            }
            for entry in entries {
                let status = match entry.status {
                    wardend::exec::ActionStatus::Pending => "pending".yellow(),
                    wardend::exec::ActionStatus::Executed => "executed".green(),
                    wardend::exec::ActionStatus::Failed => "failed".red(),
                    wardend::exec::ActionStatus::Rejected => "rejected".red(),
                    wardend::exec::ActionStatus::Approved => "approved".cyan(),
                };
                println!(
                    "#{} {} {} {} - {} (risk {})",
                    entry.queue_id, status, entry.action.kind, entry.action.subject, entry.action.description, entry.action.risk
                );
            }
            Ok(())
        }

        ApproveCommand::Approve { id } => {
            let outcome = components.router.approve(id).await?;
            info!(id, success = outcome.success, "Approved action settled");
            if outcome.success {
                println!("{} {}", "executed:".green(), outcome.summary);
            } else {
                println!("{} {}", "failed:".red(), outcome.summary);
            }
            for output in &outcome.outputs {
                if !output.stdout.trim().is_empty() {
                    println!("{}", output.stdout.trim());
                }
                if !output.stderr.trim().is_empty() {
                    eprintln!("{}", output.stderr.trim());
                }
            }
            Ok(())
        }

        ApproveCommand::Reject { id } => {
            components.router.reject(id).await?;
            println!("rejected #{}", id);
            Ok(())
        }

        ApproveCommand::Discuss { id } => {
            let entry = components
                .executor
                .get(id)
                .await
                .ok_or_else(|| eyre::eyre!("No queued action with id {}", id))?;
            orchestrator::announce_host(&components).await?;
            let explanation = components.meta.discuss(&entry).await?;
            println!("{}", explanation);
            Ok(())
        }
    }
}

fn handle_logs(config: Config, stream: LogStream, lines: usize) -> Result<()> {
    let printed = match stream {
        LogStream::Daemon => {
            let path = daemon_log_path();
            if !path.exists() {
                Vec::new()
            } else {
                let content = std::fs::read_to_string(&path).context("Failed to read daemon log")?;
                let all: Vec<&str> = content.lines().collect();
                let start = all.len().saturating_sub(lines);
                all[start..].iter().map(|l| l.to_string()).collect()
            }
        }
        LogStream::Decisions => JsonlLog::new(config.decisions_log_path()).tail(lines)?,
        LogStream::Actions => JsonlLog::new(config.actions_log_path()).tail(lines)?,
    };

    for line in printed {
        println!("{}", line);
    }
    Ok(())
}

fn handle_issues(config: Config, action: IssueCommand) -> Result<()> {
    let know = knowstore::KnowStore::open(config.know_db_path()).context("Failed to open knowledge store")?;
    let host = config.host();

    match action {
        IssueCommand::List => {
            let issues = know.list_issues(None)?;
            if issues.is_empty() {
                println!("no issues");
                return Ok(());
            }
            for issue in issues {
                let status = match issue.status {
                    knowstore::IssueStatus::Open => "open".red(),
                    knowstore::IssueStatus::Investigating => "investigating".yellow(),
                    knowstore::IssueStatus::Resolved => "resolved".green(),
                    knowstore::IssueStatus::Closed => "closed".dimmed(),
                };
                println!(
                    "{} [{}] {} ({}, {} events, updated {})",
                    issue.id,
                    status,
                    issue.title,
                    issue.severity,
                    issue.event_count,
                    issue.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }

        IssueCommand::Show { id } => {
            let issue = know.get_issue(&id)?.ok_or_else(|| eyre::eyre!("No issue with id {}", id))?;
            println!("{}", serde_json::to_string_pretty(&issue)?);
            Ok(())
        }

        IssueCommand::Create {
            title,
            description,
            severity,
        } => {
            let severity: knowstore::Severity = severity.parse().map_err(|e: String| eyre::eyre!(e))?;
            let issue = knowstore::Issue::new(&host, "operator", title, description, severity);
            know.upsert_issue(&issue)?;
            println!("created {}", issue.id);
            Ok(())
        }

        IssueCommand::Resolve { id, note } => {
            let mut issue = know.get_issue(&id)?.ok_or_else(|| eyre::eyre!("No issue with id {}", id))?;
            issue.resolve(note);
            know.upsert_issue(&issue)?;
            println!("resolved {}", id);
            Ok(())
        }

        IssueCommand::Close { id } => {
            let mut issue = know.get_issue(&id)?.ok_or_else(|| eyre::eyre!("No issue with id {}", id))?;
            issue.status = knowstore::IssueStatus::Closed;
            issue.updated_at = chrono::Utc::now();
            know.upsert_issue(&issue)?;
            println!("closed {}", id);
            Ok(())
        }
    }
}
