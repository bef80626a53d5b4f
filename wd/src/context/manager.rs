//! Context window actor
//!
//! Owns the window and processes commands from a mailbox, one at a
//! time. Producers submit entries and suspend until admitted; readers
//! receive immutable snapshots so assembly never observes a mutation.

use std::path::PathBuf;
use std::sync::Arc;

use metricstore::MetricStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::context::assemble::{AssembleOptions, assemble};
use crate::context::entry::ContextEntry;
use crate::context::messages::{ContextCommand, ContextError};
use crate::context::window::{Admission, CompressOptions, ContextWindow, WindowSnapshot};
use crate::llm::LlmClient;

/// Everything the actor needs at spawn time
pub struct ContextManagerConfig {
    pub budget_tokens: u64,
    pub compress: CompressOptions,
    pub assemble: AssembleOptions,
    /// Window snapshot location; restore happens here at spawn
    pub snapshot_path: Option<PathBuf>,
    /// Small tier used for aged-entry summaries
    pub summarizer: Option<Arc<dyn LlmClient>>,
    /// Source of the recent-metrics table
    pub metrics: Option<Arc<MetricStore>>,
    pub host: String,
}

/// Handle for submitting commands to the context actor
#[derive(Clone)]
pub struct ContextHandle {
    tx: mpsc::Sender<ContextCommand>,
}

impl ContextHandle {
    /// Spawn the actor, restoring a snapshot when one exists
    pub fn spawn(config: ContextManagerConfig) -> Self {
        let window = match config.snapshot_path.as_ref().and_then(|p| try_restore(p)) {
            Some(snapshot) => {
                info!(
                    entries = snapshot.entries.len(),
                    tokens = snapshot.total_tokens(),
                    "Restored context window snapshot"
                );
                ContextWindow::from_snapshot(snapshot)
            }
            None => ContextWindow::new(config.budget_tokens),
        };

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(window, rx, config));
        Self { tx }
    }

    /// Submit an entry; suspends until admission completes
    pub async fn admit(&self, entry: ContextEntry) -> Result<Admission, ContextError> {
        debug!(tokens = entry.token_count, "ContextHandle::admit: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ContextCommand::Admit { entry, reply })
            .await
            .map_err(|_| ContextError::ChannelClosed)?;
        rx.await.map_err(|_| ContextError::ChannelClosed)
    }

    /// Install or replace the pinned system header
    pub async fn set_header(&self, text: impl Into<String>) -> Result<(), ContextError> {
        debug!("ContextHandle::set_header: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ContextCommand::SetHeader { text: text.into(), reply })
            .await
            .map_err(|_| ContextError::ChannelClosed)?;
        rx.await.map_err(|_| ContextError::ChannelClosed)
    }

    /// Point-in-time copy of the whole window
    pub async fn snapshot(&self) -> Result<WindowSnapshot, ContextError> {
        debug!("ContextHandle::snapshot: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ContextCommand::Snapshot { reply })
            .await
            .map_err(|_| ContextError::ChannelClosed)?;
        rx.await.map_err(|_| ContextError::ChannelClosed)
    }

    /// Assemble a prompt bounded by `budget` tokens
    pub async fn assemble(&self, budget: u64) -> Result<String, ContextError> {
        debug!(budget, "ContextHandle::assemble: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ContextCommand::Assemble { budget, reply })
            .await
            .map_err(|_| ContextError::ChannelClosed)?;
        rx.await.map_err(|_| ContextError::ChannelClosed)
    }

    /// Persist the window snapshot to disk
    pub async fn save(&self) -> Result<(), ContextError> {
        debug!("ContextHandle::save: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ContextCommand::Save { reply })
            .await
            .map_err(|_| ContextError::ChannelClosed)?;
        rx.await.map_err(|_| ContextError::ChannelClosed)?
    }
}

fn try_restore(path: &PathBuf) -> Option<WindowSnapshot> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path).ok().and_then(|s| serde_json::from_str(&s).ok()) {
        Some(snapshot) => Some(snapshot),
        None => {
            warn!(path = %path.display(), "Context snapshot unreadable, starting fresh");
            None
        }
    }
}

async fn actor_loop(mut window: ContextWindow, mut rx: mpsc::Receiver<ContextCommand>, config: ContextManagerConfig) {
    debug!("context actor_loop: started");
    while let Some(command) = rx.recv().await {
        match command {
            ContextCommand::Admit { entry, reply } => {
                let outcome = window
                    .admit(entry, config.summarizer.as_deref(), &config.compress)
                    .await;
                let _ = reply.send(outcome);
            }
            ContextCommand::SetHeader { text, reply } => {
                window.set_header(text);
                let _ = reply.send(());
            }
            ContextCommand::Snapshot { reply } => {
                let _ = reply.send(window.snapshot());
            }
            ContextCommand::Assemble { budget, reply } => {
                let prompt = assemble(
                    &window.snapshot(),
                    config.metrics.as_deref(),
                    &config.host,
                    budget,
                    &config.assemble,
                );
                let _ = reply.send(prompt);
            }
            ContextCommand::Save { reply } => {
                let _ = reply.send(save_snapshot(&window, config.snapshot_path.as_ref()));
            }
        }
    }
    debug!("context actor_loop: channel closed, exiting");
}

/// Write the snapshot atomically: temp file then rename
fn save_snapshot(window: &ContextWindow, path: Option<&PathBuf>) -> Result<(), ContextError> {
    let Some(path) = path else {
        return Ok(());
    };

    let json = serde_json::to_string(&window.snapshot()).map_err(|e| ContextError::Snapshot(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ContextError::Snapshot(e.to_string()))?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| ContextError::Snapshot(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| ContextError::Snapshot(e.to_string()))?;
    debug!(path = %path.display(), bytes = json.len(), "Saved context snapshot");
    Ok(())
}
