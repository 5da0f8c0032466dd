//! Google Gemini `generateContent` backend.
//!
//! Gemini has no system role: system text is folded into the first user turn, and
//! assistant turns are sent as role `model`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ensure_success, http_client, send_with_retry, ChatMessage, ChatModel, ChatRequest, LlmError,
    Provider, MAX_TOKENS, TEMPERATURE,
};
use crate::models::conversation::Role;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl GenerateContentResponse {
    /// Text parts of the first candidate joined together, if non-empty.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Maps chat messages onto Gemini `contents`.
fn to_contents(messages: &[ChatMessage]) -> Vec<Content> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut contents: Vec<Content> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| Content {
            role: if m.role == Role::Assistant { "model" } else { "user" },
            parts: vec![Part {
                text: m.content.clone(),
            }],
        })
        .collect();

    if system.is_empty() {
        return contents;
    }
    let system = system.join("\n\n");
    if let Some(first_user) = contents.iter_mut().find(|c| c.role == "user") {
        let question = std::mem::take(&mut first_user.parts[0].text);
        first_user.parts[0].text = format!("{system}\n\n---\n\nUser question: {question}");
        return contents;
    }
    contents.insert(
        0,
        Content {
            role: "user",
            parts: vec![Part { text: system }],
        },
    );
    contents
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new() -> Result<Self, LlmError> {
        Self::with_url(GEMINI_API_URL)
    }

    pub fn with_url(base_url: impl Into<String>) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, LlmError> {
        let body = GenerateContentRequest {
            contents: to_contents(request.messages),
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_TOKENS,
            },
        };
        let url = format!("{}/{}:generateContent", self.base_url, request.model);

        // Header auth keeps the key out of the request URL.
        let raw = send_with_retry(|| {
            self.client
                .post(&url)
                .header(API_KEY_HEADER, request.api_key)
                .json(&body)
        })
        .await?;
        let response: GenerateContentResponse = serde_json::from_str(&raw)?;

        if let Some(usage) = &response.usage_metadata {
            debug!(
                model = request.model,
                "Gemini call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_token_count,
                usage.candidates_token_count
            );
        }

        response.text().ok_or(LlmError::EmptyContent)
    }

    /// Lists models with the key; any non-success status means the key is unusable.
    async fn verify_key(&self, _provider: Provider, api_key: &str) -> Result<(), LlmError> {
        let response = self
            .client
            .get(&self.base_url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;
        ensure_success(response).await
    }
}
