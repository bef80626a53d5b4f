//! Interactive operator sessions
//!
//! A line-edited REPL against the meta tier. Session history stays in
//! this process, outside the global context window.

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use crate::llm::ChatMessage;
use crate::reason::MetaReasoner;

/// Run a chat session until the operator leaves
pub async fn run_chat(meta: &MetaReasoner) -> Result<()> {
    println!("{}", "warden chat - /quit or ctrl-d to leave".dimmed());
    let mut rl = DefaultEditor::new()?;
    let mut history: Vec<ChatMessage> = Vec::new();

    loop {
        match rl.readline("warden> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if matches!(line, "/quit" | "/exit" | "quit" | "exit") {
                    break;
                }
                let _ = rl.add_history_entry(line);

                match meta.session_turn(&history, line).await {
                    Ok(reply) => {
                        println!("{}", reply);
                        history.push(ChatMessage::user(line.to_string()));
                        history.push(ChatMessage::assistant(reply));
                    }
                    Err(e) => {
                        eprintln!("{} {}", "error:".red(), e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                debug!("run_chat: session ended by operator");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("{}", "session closed".dimmed());
    Ok(())
}
