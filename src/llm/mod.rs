//! LLM provider abstraction layer.
//!
//! A single async trait over the chat-completion APIs of the supported
//! vendors, a dispatch table that builds the right provider for an agent,
//! and the normalized `{content, usage, model, finishReason}` /
//! `{error, provider}` result shape.

mod mock;
mod providers;

pub use mock::MockProvider;
pub use providers::{AnthropicProvider, GoogleProvider, GroqProvider, OpenAiProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when interacting with an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// An HTTP-level error (connection failure, DNS, TLS, etc.).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The API returned a non-success status with a message.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse the API response body.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The API indicated rate limiting (HTTP 429).
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The requested provider or operation is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::HttpError(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Core data types
// ---------------------------------------------------------------------------

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmRole::System => write!(f, "system"),
            LlmRole::User => write!(f, "user"),
            LlmRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmRole::User, content)
    }
}

/// Configuration for one completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: ProviderKind::OpenAi.default_model().to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            system_prompt: None,
        }
    }
}

/// Token accounting for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Response from an LLM completion, normalized across vendors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub content: String,
    pub usage: LlmUsage,
    pub model: String,
    pub finish_reason: String,
}

/// A failed completion, normalized across vendors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub error: String,
    pub provider: String,
}

/// Either shape a completion can take on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    Ok(LlmResponse),
    Failed(ProviderFailure),
}

// ---------------------------------------------------------------------------
// LlmProvider trait
// ---------------------------------------------------------------------------

/// Async trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Vendor name, used in normalized failures and logs.
    fn name(&self) -> &str;

    /// Send a completion request and return the full response.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError>;
}

/// Run a completion and fold any error into the `{error, provider}` shape.
pub async fn complete_normalized(
    provider: &dyn LlmProvider,
    messages: &[LlmMessage],
    config: &LlmConfig,
) -> Completion {
    match provider.complete(messages, config).await {
        Ok(response) => Completion::Ok(response),
        Err(e) => Completion::Failed(ProviderFailure {
            error: e.to_string(),
            provider: provider.name().to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Provider dispatch
// ---------------------------------------------------------------------------

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Groq,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::Groq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Groq => "groq",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" | "claude" => Some(ProviderKind::Anthropic),
            "google" | "gemini" => Some(ProviderKind::Google),
            "groq" => Some(ProviderKind::Groq),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            ProviderKind::Google => "gemini-1.5-flash",
            ProviderKind::Groq => "llama-3.1-70b-versatile",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Google => "https://generativelanguage.googleapis.com",
            ProviderKind::Groq => "https://api.groq.com/openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a provider for `kind`. `base_url` overrides the vendor default.
pub fn build_provider(
    kind: ProviderKind,
    api_key: impl Into<String>,
    base_url: Option<&str>,
    timeout: Duration,
) -> Box<dyn LlmProvider> {
    let base_url = base_url.unwrap_or(kind.default_base_url()).to_string();
    let api_key = api_key.into();

    match kind {
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(api_key, timeout).with_base_url(base_url)),
        ProviderKind::Anthropic => {
            Box::new(AnthropicProvider::new(api_key, timeout).with_base_url(base_url))
        }
        ProviderKind::Google => Box::new(GoogleProvider::new(api_key, timeout).with_base_url(base_url)),
        ProviderKind::Groq => Box::new(GroqProvider::new(api_key, timeout).with_base_url(base_url)),
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Pull the first JSON object or array out of model output.
///
/// Models wrap JSON in Markdown fences or lead with prose; both are tolerated.
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed)
        && (value.is_object() || value.is_array())
    {
        return Some(value);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(unfenced)
        && (value.is_object() || value.is_array())
    {
        return Some(value);
    }

    // Fall back to the outermost bracketed span.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (unfenced.find(open), unfenced.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str(&unfenced[start..=end])
        {
            return Some(value);
        }
    }
    None
}

fn strip_code_fence(s: &str) -> &str {
    let Some(start) = s.find("```") else {
        return s;
    };
    let after = &s[start + 3..];
    // Skip an info string such as `json`.
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}
