//! Chat-completions client for OpenAI-compatible providers (Groq by default).
//!
//! One [`ChatClient`] is bound to one API key; the
//! [`ResilientInvoker`](crate::invoker::ResilientInvoker) builds a fresh
//! client for every attempt so a rotated key takes effect immediately.

use anyhow::{Context, Result};
use thiserror::Error;

use crate::config::LlmConfig;

/// Non-success HTTP response from the provider.
///
/// The status is kept as a number so the retry classifier can recognise
/// rate limiting (429) and rejected keys (401) without string matching.
#[derive(Debug, Error)]
#[error("LLM API error {status}: {body}")]
pub struct ApiError {
    pub status: u16,
    pub body: String,
}

/// Chat-completions client bound to a single API key.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl ChatClient {
    /// `http` is shared across clients; it carries the request timeout.
    pub fn new(config: &LlmConfig, api_key: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: api_key.to_string(),
        }
    }

    /// Send a single user message and return the assistant's text.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("LLM request to {} failed", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("LLM response was not valid JSON")?;
        parse_chat_response(&json)
    }
}

/// Build the shared HTTP client used by every [`ChatClient`].
pub fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(config.timeout()).build()?)
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing choices[0].message.content"))
}
