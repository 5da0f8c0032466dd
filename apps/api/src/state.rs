use std::sync::Arc;

use crate::compiler::DocumentCompiler;
use crate::config::Config;
use crate::extract::TextExtractor;
use crate::feedback::FeedbackStore;
use crate::llm_client::ChatModel;
use crate::session::{ChatBackend, SessionRegistry};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    /// Pluggable chat model. Default: ModelRouter over OpenRouter and Gemini; tests swap in stubs.
    pub llm: Arc<dyn ChatModel>,
    pub compiler: Arc<dyn DocumentCompiler>,
    pub extractor: Arc<dyn TextExtractor>,
    /// Postgres when DATABASE_URL is set, in-memory otherwise.
    pub feedback: Arc<dyn FeedbackStore>,
    pub config: Config,
}

impl AppState {
    pub fn chat_backend(&self) -> ChatBackend {
        ChatBackend {
            model: self.llm.clone(),
            feedback: self.feedback.clone(),
        }
    }
}
