//! Completion API client and result normalization.
//!
//! Defines the [`CompletionClient`] trait and its implementations:
//! - **[`OpenAiClient`]**: calls `POST {base_url}/chat/completions`.
//! - **[`DisabledClient`]**: always errors; used when `completion.provider = "disabled"`.
//!
//! [`analyze`] wraps one call and folds every outcome into an
//! [`AnalysisResult`]: parsed JSON on success, `status = error` otherwise.
//! A single request is made per call. There is no retry, and timeouts are
//! whatever `reqwest` defaults to.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::CompletionConfig;
use crate::models::{AnalysisResult, Attachment};
use crate::prompt::{build_messages, ChatMessage};

/// A chat-completion backend returning the text of the first choice.
///
/// Constructed once at startup and shared by all requests.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model identifier sent with each request (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Sends the messages and returns the reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Builds the client selected by `completion.provider`.
///
/// # Errors
///
/// Fails if the provider is `openai` and the API key variable is unset.
pub fn create_client(config: &CompletionConfig) -> Result<Arc<dyn CompletionClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiClient::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledClient)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledClient;

#[async_trait]
impl CompletionClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

// ============ OpenAI ============

/// Chat-completions client for OpenAI and compatible endpoints.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Ok(Self::with_api_key(config, api_key))
    }

    pub fn with_api_key(config: &CompletionConfig, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("completion request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read completion response")?;

        if !status.is_success() {
            bail!("{}", api_error_message(status, &text));
        }

        let json: Value =
            serde_json::from_str(&text).context("completion API returned invalid JSON")?;
        parse_chat_response(&json)
    }
}

/// Pulls `error.message` out of an error body, falling back to the raw text.
fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    format!("OpenAI API error {}: {}", status, detail)
}

/// Extracts `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))
}

// ============ Analysis ============

/// Runs one completion and normalizes the outcome.
///
/// The reply is parsed strictly as JSON. Its shape is not checked against
/// the template that asked for it.
pub async fn analyze(
    client: &dyn CompletionClient,
    mail_id: &str,
    messages: &[ChatMessage],
) -> AnalysisResult {
    let reply = match client.complete(messages).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(mail_id, error = %format!("{:#}", e), "completion API error");
            return AnalysisResult::failure(mail_id, format!("{:#}", e));
        }
    };

    match serde_json::from_str::<Value>(&reply) {
        Ok(data) => AnalysisResult::success(mail_id, data),
        Err(e) => {
            tracing::error!(mail_id, error = %e, "failed to parse model reply as JSON");
            AnalysisResult::failure(mail_id, format!("JSON parsing error: {}", e))
        }
    }
}

/// Builds the prompt for a mail and analyzes it.
pub async fn analyze_mail(
    client: &dyn CompletionClient,
    mail_id: &str,
    attachments: &[Attachment],
) -> AnalysisResult {
    let messages = build_messages(mail_id, attachments);
    analyze(client, mail_id, &messages).await
}
