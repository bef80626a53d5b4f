//! OpenAI-compatible chat-completions client
//!
//! All three tiers speak the same wire contract: POST
//! `{model, messages, max_tokens, stream:false}` and read
//! `{choices:[{message:{content}}]}`. Non-200 responses and malformed
//! JSON are errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatMessage, CompletionRequest, CompletionResponse, LlmClient, LlmError, Tier, TokenUsage};
use crate::config::LlmTierConfig;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 500;

/// Optional bearer token for backends that require one
const API_KEY_ENV: &str = "WARDEN_LLM_API_KEY";

/// One tier's chat-completions backend
pub struct ChatBackend {
    tier: Tier,
    model: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
    /// Bounded retry count for transient failures
    retries: u32,
    api_key: Option<String>,
}

impl ChatBackend {
    /// Create a backend from tier configuration
    pub fn from_config(tier: Tier, config: &LlmTierConfig, retries: u32) -> Result<Self, LlmError> {
        debug!(%tier, model = %config.model, "ChatBackend::from_config: called");
        let timeout = Duration::from_secs(config.timeout_s);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            tier,
            model: config.model.clone(),
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
            timeout,
            retries,
            api_key: std::env::var(API_KEY_ENV).ok(),
        })
    }

    /// Build the request body
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(self.convert_messages(&request.messages));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "stream": false,
        })
    }

    fn convert_messages(&self, messages: &[ChatMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role.as_str(),
                    "content": msg.content,
                })
            })
            .collect()
    }

    fn parse_response(&self, api_response: ChatResponse) -> Result<CompletionResponse, LlmError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("Response carried no choices".to_string()))?;

        let content = choice
            .message
            .content
            .ok_or_else(|| LlmError::InvalidResponse("Choice carried no content".to_string()))?;

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse { content, usage })
    }

    fn map_send_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Network(err)
        }
    }
}

#[async_trait]
impl LlmClient for ChatBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(tier = %self.tier, model = %self.model, max_tokens = request.max_tokens, "complete: called");
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let mut last_error = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(
                    tier = %self.tier,
                    attempt,
                    backoff_ms = backoff,
                    "complete: retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let mut req = self.http.post(&url).header("content-type", "application/json").json(&body);
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    let err = self.map_send_error(e);
                    debug!(tier = %self.tier, attempt, error = %err, "complete: request failed");
                    if err.is_retryable() && attempt < self.retries {
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                let err = LlmError::ApiError { status, message: text };
                debug!(tier = %self.tier, attempt, status, "complete: API error");
                if err.is_retryable() && attempt < self.retries {
                    last_error = Some(err);
                    continue;
                }
                return Err(err);
            }

            let api_response: ChatResponse = response.json().await?;
            debug!(tier = %self.tier, "complete: success");
            return self.parse_response(api_response);
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("Retries exhausted".to_string())))
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
