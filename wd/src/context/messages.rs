//! Command and error types for the context window actor

use thiserror::Error;
use tokio::sync::oneshot;

use crate::context::entry::ContextEntry;
use crate::context::window::{Admission, WindowSnapshot};

/// Errors surfaced by the context handle
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context actor channel closed")]
    ChannelClosed,

    #[error("Snapshot persistence failed: {0}")]
    Snapshot(String),
}

/// Commands processed by the context actor, one at a time
///
/// Serializing every mutation through this mailbox is what makes the
/// window single-writer; readers only ever see point-in-time snapshots.
pub enum ContextCommand {
    Admit {
        entry: ContextEntry,
        reply: oneshot::Sender<Admission>,
    },
    SetHeader {
        text: String,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<WindowSnapshot>,
    },
    Assemble {
        budget: u64,
        reply: oneshot::Sender<String>,
    },
    Save {
        reply: oneshot::Sender<Result<(), ContextError>>,
    },
}
