//! HTTP signal providers: OpenAI chat completions, Anthropic messages, and
//! DeepSeek's OpenAI-compatible API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use quorum_models::{HttpProviderSettings, ProviderSignal};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::parser::parse_signal;
use crate::provider::{ProviderRequest, SignalProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Connection settings and client shared by the HTTP adapters.
struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
}

impl HttpTransport {
    fn new(
        settings: &HttpProviderSettings,
        default_base_url: &str,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(settings.timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {e}")))?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            base_url,
            api_key,
            api_key_env: settings.api_key_env.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout,
        })
    }

    fn from_env(settings: &HttpProviderSettings, default_base_url: &str) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(
                env = %settings.api_key_env,
                model = %settings.model,
                "API key not set; provider will be excluded from every round"
            );
        }
        Self::new(settings, default_base_url, api_key)
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Auth(format!("environment variable {} is not set", self.api_key_env))
        })
    }

    /// POST a JSON body and return the response text of a 2xx reply.
    async fn post(
        &self,
        path: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, model = %self.model, "Sending provider request");

        let mut request = self.client.post(&url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            warn!(url = %url, status = %status, "Provider returned error status");
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn chat_content(provider: &str, body: &str) -> Result<String, ProviderError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Parse(format!("{provider} chat response: {e}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse(format!("{provider} returned no choices")))?;
    choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ProviderError::Parse(format!("{provider} returned empty content")))
}

/// Remove `<think>...</think>` reasoning blocks. An unterminated block runs
/// to the end of the text.
pub fn strip_reasoning_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
struct ChatCompletionsClient {
    id: String,
    transport: HttpTransport,
}

impl ChatCompletionsClient {
    async fn complete(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let key = self.transport.api_key()?;
        let body = json!({
            "model": self.transport.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": self.transport.temperature,
            "max_tokens": self.transport.max_tokens,
        });
        let text = self
            .transport
            .post(
                "/chat/completions",
                &[("authorization", format!("Bearer {key}"))],
                &body,
            )
            .await?;
        chat_content(&self.id, &text)
    }
}

pub struct OpenAiProvider {
    inner: ChatCompletionsClient,
}

impl OpenAiProvider {
    pub fn new(id: String, settings: &HttpProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: ChatCompletionsClient {
                id,
                transport: HttpTransport::from_env(settings, OPENAI_BASE_URL)?,
            },
        })
    }

    pub fn with_api_key(
        id: String,
        settings: &HttpProviderSettings,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: ChatCompletionsClient {
                id,
                transport: HttpTransport::new(settings, OPENAI_BASE_URL, Some(api_key.into()))?,
            },
        })
    }
}

#[async_trait]
impl SignalProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderSignal, ProviderError> {
        let start = Instant::now();
        let content = self.inner.complete(request).await?;
        parse_signal(&self.inner.id, &content, start.elapsed().as_millis() as u64)
    }
}

pub struct DeepSeekProvider {
    inner: ChatCompletionsClient,
}

impl DeepSeekProvider {
    pub fn new(id: String, settings: &HttpProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: ChatCompletionsClient {
                id,
                transport: HttpTransport::from_env(settings, DEEPSEEK_BASE_URL)?,
            },
        })
    }

    pub fn with_api_key(
        id: String,
        settings: &HttpProviderSettings,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: ChatCompletionsClient {
                id,
                transport: HttpTransport::new(settings, DEEPSEEK_BASE_URL, Some(api_key.into()))?,
            },
        })
    }
}

#[async_trait]
impl SignalProvider for DeepSeekProvider {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderSignal, ProviderError> {
        let start = Instant::now();
        let content = self.inner.complete(request).await?;
        let answer = strip_reasoning_blocks(&content);
        parse_signal(&self.inner.id, &answer, start.elapsed().as_millis() as u64)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn messages_text(provider: &str, body: &str) -> Result<String, ProviderError> {
    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Parse(format!("{provider} messages response: {e}")))?;
    let text: String = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        return Err(ProviderError::Parse(format!("{provider} returned no text content")));
    }
    Ok(text)
}

pub struct AnthropicProvider {
    id: String,
    transport: HttpTransport,
}

impl AnthropicProvider {
    pub fn new(id: String, settings: &HttpProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            id,
            transport: HttpTransport::from_env(settings, ANTHROPIC_BASE_URL)?,
        })
    }

    pub fn with_api_key(
        id: String,
        settings: &HttpProviderSettings,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            id,
            transport: HttpTransport::new(settings, ANTHROPIC_BASE_URL, Some(api_key.into()))?,
        })
    }
}

#[async_trait]
impl SignalProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderSignal, ProviderError> {
        let start = Instant::now();
        let key = self.transport.api_key()?;
        let body = json!({
            "model": self.transport.model,
            "max_tokens": self.transport.max_tokens,
            "temperature": self.transport.temperature,
            "system": request.system_prompt,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        let text = self
            .transport
            .post(
                "/messages",
                &[
                    ("x-api-key", key.to_string()),
                    ("anthropic-version", ANTHROPIC_VERSION.to_string()),
                ],
                &body,
            )
            .await?;
        let content = messages_text(&self.id, &text)?;
        parse_signal(&self.id, &content, start.elapsed().as_millis() as u64)
    }
}
