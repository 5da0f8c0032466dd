//! LLM path orchestration: prompt, cancellable call, reply → document patch.
//!
//! A reply only touches the document through its first ```latex block, which is run
//! through the patch resolver. Replies without one are conversational.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::feedback::FeedbackStore;
use crate::llm_client::prompts::build_system_prompt;
use crate::llm_client::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::models::conversation::{ConversationTurn, LearnedExample, Role, UploadedFile};
use crate::patch::{extract_latex_block, resolve_update, UpdateResult};

/// Prior turns sent with each call.
pub const MAX_CONTEXT_TURNS: usize = 10;
/// Learned examples embedded in the system prompt.
pub const MAX_LEARNED_EXAMPLES: usize = 3;
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const CACHE_MAX_ENTRIES: usize = 50;

pub const EXTRACTION_WARNING: &str = "Failed to extract code from AI response";

/// Result of an LLM round trip. Cancellation is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    Reply(String),
    Cancelled,
}

/// Everything one chat call needs besides the turns.
pub struct ChatCall<'a> {
    pub model_id: &'a str,
    pub api_key: &'a str,
    pub document: &'a str,
    pub uploaded_files: &'a [UploadedFile],
    pub examples: &'a [LearnedExample],
}

/// Sends the system prompt plus the last `MAX_CONTEXT_TURNS` turns, racing the call
/// against `cancel`. A fired or dropped cancel handle aborts the request.
pub async fn request_reply(
    model: &dyn ChatModel,
    call: ChatCall<'_>,
    turns: &[ConversationTurn],
    cancel: oneshot::Receiver<()>,
) -> Result<ChatOutcome, LlmError> {
    let mut messages = Vec::with_capacity(MAX_CONTEXT_TURNS + 1);
    messages.push(ChatMessage::new(
        Role::System,
        build_system_prompt(call.document, call.uploaded_files, call.examples),
    ));
    let recent = &turns[turns.len().saturating_sub(MAX_CONTEXT_TURNS)..];
    messages.extend(
        recent
            .iter()
            .map(|t| ChatMessage::new(t.role, t.content.clone())),
    );

    debug!(
        model = call.model_id,
        turns = recent.len(),
        document_chars = call.document.len(),
        "sending chat request"
    );

    let request = ChatRequest {
        model: call.model_id,
        api_key: call.api_key,
        messages: &messages,
    };

    tokio::select! {
        biased;
        _ = cancel => {
            info!("chat request cancelled");
            Ok(ChatOutcome::Cancelled)
        }
        reply = model.complete(request) => reply.map(ChatOutcome::Reply),
    }
}

/// Examples for the prompt. A failing store degrades to no examples.
pub async fn learned_examples(feedback: &dyn FeedbackStore) -> Vec<LearnedExample> {
    match feedback.high_rated(MAX_LEARNED_EXAMPLES).await {
        Ok(examples) => examples,
        Err(e) => {
            warn!("could not load learned examples: {e}");
            Vec::new()
        }
    }
}

/// What a reply does to the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyPatch {
    pub update: Option<UpdateResult>,
    pub warning: Option<String>,
}

/// Resolves the reply's first ```latex block against `document`.
pub fn patch_from_reply(document: &str, reply: &str, instruction: &str) -> ReplyPatch {
    match extract_latex_block(reply) {
        Some(code) => {
            let update = resolve_update(document, code, instruction);
            info!(
                update_type = ?update.update_type,
                section = update.section.as_deref().unwrap_or("-"),
                "reply resolved into document update"
            );
            let warning = update.warning.clone();
            ReplyPatch {
                update: Some(update),
                warning,
            }
        }
        None if reply.contains("```") => {
            warn!("reply has a code block but no latex block");
            ReplyPatch {
                update: None,
                warning: Some(EXTRACTION_WARNING.to_string()),
            }
        }
        None => ReplyPatch {
            update: None,
            warning: None,
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Response cache
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
}

struct CacheEntry {
    reply: String,
    inserted_at: Instant,
}

/// Per-session reply cache. Entries expire after the TTL; when full, the oldest goes.
pub struct ResponseCache {
    entries: HashMap<u64, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CACHE_TTL, CACHE_MAX_ENTRIES)
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Key over everything that shapes the reply.
    pub fn key(model_id: &str, document: &str, turns: &[ConversationTurn]) -> u64 {
        let mut hasher = DefaultHasher::new();
        model_id.hash(&mut hasher);
        document.hash(&mut hasher);
        for turn in turns {
            turn.role.hash(&mut hasher);
            turn.content.hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn get(&mut self, key: u64) -> Option<String> {
        let fresh = self
            .entries
            .get(&key)
            .map(|e| e.inserted_at.elapsed() < self.ttl)?;
        if fresh {
            self.entries.get(&key).map(|e| e.reply.clone())
        } else {
            self.entries.remove(&key);
            None
        }
    }

    pub fn insert(&mut self, key: u64, reply: String) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                reply,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
