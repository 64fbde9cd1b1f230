use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CompletionError;
use crate::prompt::Prompt;
use crate::utils::excerpt;

/// Text returned by the completion service for one request, unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub raw_text: String,
}

impl CompletionResponse {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
        }
    }
}

/// A single-shot text completion capability. Implementations never retry.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: Prompt) -> Result<CompletionResponse, CompletionError>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiCompleter {
    api_key: String,
    api_base: String,
    model: String,
    client: Client,
}

impl OpenAiCompleter {
    pub fn new(api_key: String, api_base: String, model: String) -> Result<Self, CompletionError> {
        // no client timeout: the service's own limits apply
        let client = Client::builder()
            .build()
            .map_err(|e| CompletionError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            api_base,
            model,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, prompt: Prompt) -> Result<CompletionResponse, CompletionError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.as_str(),
            }],
        };

        info!(
            "Requesting completion ({}, {} prompt bytes)",
            self.model,
            prompt.as_str().len()
        );
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let err = classify_status(status, &text);
            warn!("Completion failed: {}", err);
            return Err(err);
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Service(format!("malformed completion response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::Service("completion response had no content".into()))?;

        Ok(CompletionResponse::new(content))
    }
}

fn classify_status(status: StatusCode, body: &str) -> CompletionError {
    let detail = format!("HTTP {}: {}", status.as_u16(), excerpt(body.trim(), 300));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::AuthFailure(detail),
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(detail),
        _ => CompletionError::Service(detail),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
