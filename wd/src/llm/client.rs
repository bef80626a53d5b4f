//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent
///
/// This is the single abstraction every reasoning tier talks through.
/// No conversation state is kept between calls; callers that need
/// history carry it in the request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a completion request and wait for the full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
