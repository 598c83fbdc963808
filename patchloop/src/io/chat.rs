//! Chat-completion client abstraction.
//!
//! The [`ChatModel`] trait decouples the planner, loop and finalizer from the
//! HTTP provider. Tests use a scripted model that returns queued replies.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::io::config::ModelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
        }
    }
}

/// Request body for an OpenAI-compatible `chat/completions` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub n: u32,
}

impl ChatRequest {
    /// System + user prompt pair with model settings from config.
    pub fn new(config: &ModelConfig, system: &str, user: &str) -> Self {
        Self {
            model: config.name.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: config.temperature,
            n: config.samples,
        }
    }

    /// Content of the last user message, if any.
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Remote failures that callers may want to tell apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("chat API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("chat API returned no choices")]
    EmptyChoices,
}

/// Abstraction over chat-completion backends.
pub trait ChatModel {
    /// Send `request` and return the text content of the first choice.
    fn complete(&self, request: &ChatRequest) -> Result<String>;
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for an OpenAI-compatible endpoint.
pub struct OpenAiChat {
    endpoint: String,
    api_key: String,
    delay: Duration,
    http: Client,
}

impl OpenAiChat {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build chat http client")?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            delay: Duration::from_millis(config.request_delay_ms),
            http,
        })
    }
}

impl ChatModel for OpenAiChat {
    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        if !self.delay.is_zero() {
            debug!(delay_ms = self.delay.as_millis() as u64, "pausing before chat call");
            thread::sleep(self.delay);
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .with_context(|| format!("send chat request to {}", self.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            error!(status = status.as_u16(), %body, "chat request failed");
            return Err(ChatError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: CompletionResponse = resp.json().context("decode chat response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ChatError::EmptyChoices)?;
        debug!(bytes = content.len(), "chat reply received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_openai_shape() {
        let request = ChatRequest::new(&ModelConfig::default(), "be terse", "add a /health endpoint");
        let value = serde_json::to_value(&request).expect("serialize");

        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["n"], 1);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "add a /health endpoint");
        assert!(value["messages"][0].get("name").is_none());
    }

    #[test]
    fn user_prompt_returns_last_user_message() {
        let request = ChatRequest::new(&ModelConfig::default(), "sys", "usr");
        assert_eq!(request.user_prompt(), Some("usr"));
    }

    #[test]
    fn response_without_choices_is_empty() {
        let parsed: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert!(parsed.choices.is_empty());
    }
}
