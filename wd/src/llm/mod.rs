//! Tiered LLM clients
//!
//! One client contract for all three reasoning tiers. Backends are
//! OpenAI-compatible chat-completions endpoints; each tier carries its own
//! model, timeout, and budget.

mod chat;
mod client;
mod error;
mod types;

pub use chat::ChatBackend;
pub use client::LlmClient;
pub use error::LlmError;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, Role, Tier, TokenUsage};

#[cfg(test)]
pub use client::mock::MockLlmClient;
