//! Token-budgeted rolling context window
//!
//! The shared memory of the daemon: trigger events, metric summaries,
//! review verdicts, and action outcomes accumulate here under a hard
//! token budget, and every reasoner prompt is assembled from it.

mod assemble;
mod entry;
mod manager;
mod messages;
mod tokens;
mod window;

pub use assemble::{AssembleOptions, assemble};
pub use entry::{ContextEntry, EntryPayload};
pub use manager::{ContextHandle, ContextManagerConfig};
pub use messages::{ContextCommand, ContextError};
pub use tokens::{estimate_tokens, truncate_to_tokens};
pub use window::{Admission, CompressOptions, ContextWindow, WindowSnapshot};
