//! KnowStore - persistent memory for warden
//!
//! Holds long-lived issue records, operator knowledge notes, and the
//! registry of known systems. Backed by SQLite with deterministic
//! keyword-overlap similarity queries, so "find issues like this one"
//! works without an external vector database.

mod store;
mod types;

pub use store::{KnowStore, StoreError};
pub use types::{ActionNote, Investigation, Issue, IssueStatus, KnowledgeEntry, Severity, SystemInfo};
