//! Vendor chat-completion clients.

use super::{LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse, LlmRole, LlmUsage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map 429 and other non-success statuses to `LlmError`.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status().as_u16();

    if status == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Err(LlmError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::ApiError {
            status,
            message: text,
        });
    }

    Ok(resp)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible (OpenAI, Groq)
// ---------------------------------------------------------------------------

/// Build the JSON request body for an OpenAI-style Chat Completions API.
pub fn openai_request_body(messages: &[LlmMessage], config: &LlmConfig) -> Value {
    // System messages go inline in the messages array.
    let mut api_messages: Vec<Value> = Vec::new();

    if let Some(ref system) = config.system_prompt {
        api_messages.push(json!({
            "role": "system",
            "content": system,
        }));
    }

    for msg in messages {
        api_messages.push(json!({
            "role": msg.role.to_string(),
            "content": msg.content,
        }));
    }

    json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "messages": api_messages,
    })
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageResp,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessageResp {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

async fn openai_compatible_complete(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    messages: &[LlmMessage],
    config: &LlmConfig,
) -> Result<LlmResponse, LlmError> {
    let body = openai_request_body(messages, config);

    let resp = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;
    let resp = check_status(resp).await?;

    let api_resp: OpenAiResponse = resp
        .json()
        .await
        .map_err(|e| LlmError::ParseError(e.to_string()))?;

    let choice = api_resp
        .choices
        .first()
        .ok_or_else(|| LlmError::ParseError("no choices in response".into()))?;
    let usage = api_resp
        .usage
        .map(|u| LlmUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content: choice.message.content.clone().unwrap_or_default(),
        usage,
        model: api_resp.model,
        finish_reason: choice
            .finish_reason
            .clone()
            .unwrap_or_else(|| "unknown".into()),
    })
}

/// LLM provider for the OpenAI Chat Completions API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
        }
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        openai_compatible_complete(&self.client, &url, &self.api_key, messages, config).await
    }
}

/// LLM provider for Groq, which speaks the OpenAI protocol.
pub struct GroqProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GroqProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
            base_url: "https://api.groq.com/openai".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        openai_compatible_complete(&self.client, &url, &self.api_key, messages, config).await
    }
}

// ---------------------------------------------------------------------------
// AnthropicProvider
// ---------------------------------------------------------------------------

/// LLM provider for the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// `api_key` goes in the `x-api-key` header.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the JSON request body for the Messages API.
    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> Value {
        // The system prompt is a top-level field, not a message.
        let mut system_text: Option<String> = config.system_prompt.clone();

        let api_messages: Vec<Value> = messages
            .iter()
            .filter_map(|msg| {
                if msg.role == LlmRole::System {
                    if let Some(ref mut s) = system_text {
                        s.push('\n');
                        s.push_str(&msg.content);
                    } else {
                        system_text = Some(msg.content.clone());
                    }
                    None
                } else {
                    Some(json!({
                        "role": msg.role.to_string(),
                        "content": msg.content,
                    }))
                }
            })
            .collect();

        let mut body = json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": api_messages,
        });

        if let Some(system) = system_text {
            body["system"] = Value::String(system);
        }

        body
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = api_resp
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            usage: LlmUsage {
                input_tokens: api_resp.usage.input_tokens,
                output_tokens: api_resp.usage.output_tokens,
            },
            model: api_resp.model,
            finish_reason: api_resp.stop_reason.unwrap_or_else(|| "unknown".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// GoogleProvider
// ---------------------------------------------------------------------------

/// LLM provider for the Gemini `generateContent` API.
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Gemini calls the assistant `model` and takes the system prompt as
    /// `systemInstruction`.
    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> Value {
        let mut system_parts: Vec<Value> = config
            .system_prompt
            .iter()
            .map(|s| json!({ "text": s }))
            .collect();
        let mut contents: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role {
                LlmRole::System => system_parts.push(json!({ "text": msg.content })),
                LlmRole::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": msg.content }],
                })),
                LlmRole::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": msg.content }],
                })),
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": config.max_tokens,
                "temperature": config.temperature,
            },
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        body
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, config.model
        );

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let api_resp: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let candidate = api_resp
            .candidates
            .first()
            .ok_or_else(|| LlmError::ParseError("no candidates in response".into()))?;
        let content = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = api_resp
            .usage_metadata
            .map(|u| LlmUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            usage,
            model: api_resp.model_version.unwrap_or_else(|| config.model.clone()),
            finish_reason: candidate
                .finish_reason
                .clone()
                .unwrap_or_else(|| "unknown".into()),
        })
    }
}
