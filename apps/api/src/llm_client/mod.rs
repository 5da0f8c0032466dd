/// LLM Client: the single point of entry for chat-completion calls.
///
/// Everything that talks to a model goes through `ChatModel`. Production traffic goes to
/// OpenRouter's OpenAI-compatible endpoint, or to Google's Gemini API for bare `gemini-*`
/// model ids; `ModelRouter` picks the backend per call. Tests swap in canned models.
///
/// Replies are untrusted text. This module never interprets them.
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::conversation::Role;

pub mod catalog;
pub mod gemini;
pub mod prompts;

pub use gemini::GeminiClient;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const OPENROUTER_AUTH_URL: &str = "https://openrouter.ai/api/v1/auth/key";
const REQUEST_TIMEOUT_SECS: u64 = 120;
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 8000;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One completion call. `api_key` is resolved by the caller (request key or server default).
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub api_key: &'a str,
    pub messages: &'a [ChatMessage],
}

/// Upstream API family a model id is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenRouter,
}

impl Provider {
    /// Bare `gemini-*` ids go to Google directly. Vendor-prefixed ids such as
    /// `google/gemini-2.0-flash` are OpenRouter catalog entries.
    pub fn for_model(model_id: &str) -> Self {
        let id = model_id.to_ascii_lowercase();
        if id.contains("gemini") && !id.contains('/') {
            Provider::Gemini
        } else {
            Provider::OpenRouter
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::OpenRouter => "OpenRouter",
        }
    }

    /// Every key the provider issues starts with this.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Provider::Gemini => "AIzaSy",
            Provider::OpenRouter => "sk-or-",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Provider::OpenRouter),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(format!("Unknown provider '{other}'")),
        }
    }
}

/// The LLM chat collaborator. Returns the raw reply text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, LlmError>;

    /// Checks `api_key` against the provider without generating anything.
    /// Backends with no such check accept every key.
    async fn verify_key(&self, _provider: Provider, _api_key: &str) -> Result<(), LlmError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl CompletionResponse {
    /// Content of the first choice, if non-empty.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn http_client() -> Result<Client, LlmError> {
    Ok(Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?)
}

/// Sends the request `build` produces, retrying on 429 (rate limit) and 5xx errors with
/// exponential backoff. Returns the body of the first successful response.
/// Dropping the returned future aborts the in-flight request.
async fn send_with_retry<F>(build: F) -> Result<String, LlmError>
where
    F: Fn() -> RequestBuilder + Send + Sync,
{
    let mut last_error: Option<LlmError> = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s
            let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
            warn!(
                "LLM call attempt {} failed, retrying after {}ms...",
                attempt,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(LlmError::Http(e));
                continue;
            }
        };

        let status = response.status();

        if status.as_u16() == 429 || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            warn!("LLM API returned {}: {}", status, text);
            last_error = Some(LlmError::Api {
                status: status.as_u16(),
                message: text,
            });
            continue;
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: api_error_message(text),
            });
        }

        return Ok(response.text().await?);
    }

    Err(last_error.unwrap_or(LlmError::RateLimited {
        retries: MAX_RETRIES,
    }))
}

/// Fails with `LlmError::Api` unless the response status is a success.
async fn ensure_success(response: reqwest::Response) -> Result<(), LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response.text().await.unwrap_or_default();
    Err(LlmError::Api {
        status: status.as_u16(),
        message: api_error_message(text),
    })
}

/// OpenRouter chat-completions client with retry on 429 / 5xx.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    url: String,
    auth_url: String,
}

impl OpenRouterClient {
    pub fn new() -> Result<Self, LlmError> {
        Self::with_url(OPENROUTER_API_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client()?,
            url: url.into(),
            auth_url: OPENROUTER_AUTH_URL.to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, LlmError> {
        let body = CompletionRequest {
            model: request.model,
            messages: request.messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let raw = send_with_retry(|| {
            self.client
                .post(&self.url)
                .bearer_auth(request.api_key)
                .json(&body)
        })
        .await?;
        let completion: CompletionResponse = serde_json::from_str(&raw)?;

        if let Some(usage) = &completion.usage {
            debug!(
                model = request.model,
                "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        completion
            .text()
            .map(str::to_string)
            .ok_or(LlmError::EmptyContent)
    }

    async fn verify_key(&self, _provider: Provider, api_key: &str) -> Result<(), LlmError> {
        let response = self
            .client
            .get(&self.auth_url)
            .bearer_auth(api_key)
            .send()
            .await?;
        ensure_success(response).await
    }
}

/// Dispatches each call to the backend serving its model id.
pub struct ModelRouter {
    openrouter: Arc<dyn ChatModel>,
    gemini: Arc<dyn ChatModel>,
}

impl ModelRouter {
    pub fn new(openrouter: Arc<dyn ChatModel>, gemini: Arc<dyn ChatModel>) -> Self {
        Self { openrouter, gemini }
    }

    fn backend(&self, provider: Provider) -> &dyn ChatModel {
        match provider {
            Provider::OpenRouter => self.openrouter.as_ref(),
            Provider::Gemini => self.gemini.as_ref(),
        }
    }
}

#[async_trait]
impl ChatModel for ModelRouter {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, LlmError> {
        let provider = Provider::for_model(request.model);
        debug!(model = request.model, ?provider, "routing chat completion");
        self.backend(provider).complete(request).await
    }

    async fn verify_key(&self, provider: Provider, api_key: &str) -> Result<(), LlmError> {
        self.backend(provider).verify_key(provider, api_key).await
    }
}

/// Pulls `error.message` out of an API error body, falling back to the raw body.
fn api_error_message(body: String) -> String {
    serde_json::from_str::<ApiError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}
