//! Editor sessions.
//!
//! An `EditorSession` is the single writer for one live document. It owns the buffer
//! (through the executor and its busy flag), the reply cache, the chat history and the
//! abort handle of the one chat call allowed in flight. Sessions are created and dropped
//! explicitly through the `SessionRegistry`; nothing here is process-global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{
    learned_examples, patch_from_reply, request_reply, CacheStats, ChatCall, ChatOutcome,
    ResponseCache,
};
use crate::editor::{AnimationOptions, EditError, EditExecutor, EditSuccess, ViewEvent};
use crate::errors::AppError;
use crate::feedback::FeedbackStore;
use crate::llm_client::ChatModel;
use crate::models::conversation::{ConversationTurn, Role, UploadedFile};
use crate::patch::tables::EDIT_COMMAND_HINTS;
use crate::patch::UpdateResult;

/// Stored history cap. Only the last few turns are ever sent to the model.
const MAX_STORED_TURNS: usize = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// True when the instruction is worth trying on the field-edit fast path.
pub fn looks_like_edit_command(instruction: &str) -> bool {
    let lowered = instruction.to_lowercase();
    EDIT_COMMAND_HINTS.iter().any(|hint| lowered.contains(hint))
}

/// Collaborators the chat path talks to.
#[derive(Clone)]
pub struct ChatBackend {
    pub model: Arc<dyn ChatModel>,
    pub feedback: Arc<dyn FeedbackStore>,
}

pub struct Instruction<'a> {
    pub text: &'a str,
    pub model_id: &'a str,
    /// Request key, else the server default. Only the chat path needs one.
    pub api_key: Option<&'a str>,
    pub uploaded_files: &'a [UploadedFile],
    pub animation: AnimationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub message: String,
    pub conversation_id: Option<Uuid>,
    pub update: Option<UpdateResult>,
    pub warning: Option<String>,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstructionOutcome {
    FieldEdited {
        message: String,
        edit: EditSuccess,
        /// Replayable trace of the edit, drained from the buffer's log.
        events: Vec<ViewEvent>,
    },
    Replied(ChatReply),
    Cancelled,
}

pub struct EditorSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    executor: EditExecutor,
    cache: Mutex<ResponseCache>,
    history: Mutex<Vec<ConversationTurn>>,
    abort: Mutex<Option<AbortHandle>>,
}

impl EditorSession {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            executor: EditExecutor::new(document),
            cache: Mutex::new(ResponseCache::default()),
            history: Mutex::new(Vec::new()),
            abort: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &EditExecutor {
        &self.executor
    }

    pub fn document(&self) -> String {
        self.executor.document()
    }

    pub fn replace_document(&self, document: impl Into<String>) -> Result<(), EditError> {
        self.executor.replace_document(document)
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        lock(&self.history).clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        lock(&self.cache).stats()
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    #[cfg(test)]
    fn chat_in_flight(&self) -> bool {
        lock(&self.abort).is_some()
    }

    /// Aborts the in-flight chat call. Returns whether there was one.
    pub fn cancel_chat(&self) -> bool {
        match lock(&self.abort).take() {
            Some(handle) => {
                let _ = handle.tx.send(());
                info!(session_id = %self.id, "chat cancel requested");
                true
            }
            None => false,
        }
    }

    fn push_turns(&self, turns: impl IntoIterator<Item = ConversationTurn>) {
        let mut history = lock(&self.history);
        history.extend(turns);
        let overflow = history.len().saturating_sub(MAX_STORED_TURNS);
        history.drain(..overflow);
    }

    /// Routes one instruction: field-edit fast path first, then the chat path.
    pub async fn handle_instruction(
        &self,
        backend: &ChatBackend,
        instruction: Instruction<'_>,
    ) -> Result<InstructionOutcome, AppError> {
        if looks_like_edit_command(instruction.text) {
            // Stale entries from earlier writes are not part of this edit's trace.
            self.executor.take_events();
            match self
                .executor
                .execute_edit_command(instruction.text, instruction.animation)
                .await
            {
                Ok(edit) => {
                    let message = format!(
                        "I've updated your {} from \"{}\" to \"{}\".",
                        edit.field, edit.old_value, edit.new_value
                    );
                    self.push_turns([
                        ConversationTurn::new(Role::User, instruction.text),
                        ConversationTurn::new(Role::Assistant, message.clone()),
                    ]);
                    return Ok(InstructionOutcome::FieldEdited {
                        message,
                        edit,
                        events: self.executor.take_events(),
                    });
                }
                Err(EditError::Busy) => return Err(EditError::Busy.into()),
                Err(e) => debug!(reason = %e, "field edit not applicable; using chat"),
            }
        }

        self.chat(backend, instruction).await
    }

    async fn chat(
        &self,
        backend: &ChatBackend,
        instruction: Instruction<'_>,
    ) -> Result<InstructionOutcome, AppError> {
        let api_key = instruction
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Validation("API key is required".to_string()))?;

        if self.executor.is_busy() {
            return Err(EditError::Busy.into());
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let _slot = AbortSlot::claim(&self.abort, cancel_tx)?;

        let document = self.document();
        let mut turns = self.history();
        turns.push(ConversationTurn::new(Role::User, instruction.text));

        let key = ResponseCache::key(instruction.model_id, &document, &turns);
        let cached = lock(&self.cache).get(key);

        let (reply, conversation_id, from_cache) = match cached {
            Some(reply) => {
                debug!(session_id = %self.id, "chat reply served from cache");
                (reply, None, true)
            }
            None => {
                let examples = learned_examples(backend.feedback.as_ref()).await;
                let call = ChatCall {
                    model_id: instruction.model_id,
                    api_key,
                    document: &document,
                    uploaded_files: instruction.uploaded_files,
                    examples: &examples,
                };
                let reply =
                    match request_reply(backend.model.as_ref(), call, &turns, cancel_rx).await? {
                        ChatOutcome::Reply(reply) => reply,
                        ChatOutcome::Cancelled => return Ok(InstructionOutcome::Cancelled),
                    };

                lock(&self.cache).insert(key, reply.clone());

                let conversation_id = match backend
                    .feedback
                    .record_turn(self.id, instruction.text, &reply)
                    .await
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!("could not record conversation: {e}");
                        None
                    }
                };
                (reply, conversation_id, false)
            }
        };

        let patch = patch_from_reply(&document, &reply, instruction.text);
        if let Some(update) = &patch.update {
            self.executor.replace_document(update.document.clone())?;
        }

        self.push_turns([
            ConversationTurn::new(Role::User, instruction.text),
            ConversationTurn::new(Role::Assistant, reply.clone()),
        ]);

        Ok(InstructionOutcome::Replied(ChatReply {
            message: reply,
            conversation_id,
            update: patch.update,
            warning: patch.warning,
            cached: from_cache,
        }))
    }
}

/// Cancel sender of the chat call currently owning the slot.
struct AbortHandle {
    call_id: Uuid,
    tx: oneshot::Sender<()>,
}

/// Holds the session's abort slot for one chat call.
///
/// A cancelled call may still be unwinding when the next one claims the slot, so the
/// guard only clears the slot while it still holds its own handle.
struct AbortSlot<'a> {
    slot: &'a Mutex<Option<AbortHandle>>,
    call_id: Uuid,
}

impl<'a> AbortSlot<'a> {
    fn claim(
        slot: &'a Mutex<Option<AbortHandle>>,
        tx: oneshot::Sender<()>,
    ) -> Result<Self, AppError> {
        let mut guard = lock(slot);
        if guard.is_some() {
            return Err(AppError::Busy(
                "A chat request is already in progress".to_string(),
            ));
        }
        let call_id = Uuid::new_v4();
        *guard = Some(AbortHandle { call_id, tx });
        Ok(Self { slot, call_id })
    }
}

impl Drop for AbortSlot<'_> {
    fn drop(&mut self) {
        let mut guard = lock(self.slot);
        if guard.as_ref().is_some_and(|h| h.call_id == self.call_id) {
            guard.take();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<EditorSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, document: impl Into<String>) -> Arc<EditorSession> {
        let session = Arc::new(EditorSession::new(document));
        let mut sessions = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.insert(session.id, session.clone());
        info!(session_id = %session.id, active = sessions.len(), "session created");
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<EditorSession>> {
        let sessions = match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.get(&id).cloned()
    }

    /// Ends a session, aborting any chat call it still has in flight.
    pub fn remove(&self, id: Uuid) -> Option<Arc<EditorSession>> {
        let removed = {
            let mut sessions = match self.sessions.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sessions.remove(&id)
        };
        if let Some(session) = &removed {
            session.cancel_chat();
            info!(session_id = %id, "session ended");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::chat::EXTRACTION_WARNING;
    use crate::feedback::MemoryFeedbackStore;
    use crate::llm_client::{ChatRequest, LlmError};
    use crate::patch::UpdateType;

    const RESUME: &str = "\\documentclass{resume}\n\\name{Jane Doe}\n\\email{jane.old@example.com}\n\\begin{document}\n\\begin{rSection}{SKILLS}\nPython\n\\end{rSection}\n\\end{document}";

    struct ScriptedModel {
        reply: Result<String, u16>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _request: ChatRequest<'_>) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map_err(|status| LlmError::Api {
                status,
                message: "upstream failed".into(),
            })
        }
    }

    fn backend(model: Arc<ScriptedModel>) -> (ChatBackend, Arc<MemoryFeedbackStore>) {
        let feedback = Arc::new(MemoryFeedbackStore::new());
        (
            ChatBackend {
                model,
                feedback: feedback.clone(),
            },
            feedback,
        )
    }

    fn instruction(text: &str) -> Instruction<'_> {
        Instruction {
            text,
            model_id: "test/model",
            api_key: Some("key"),
            uploaded_files: &[],
            animation: AnimationOptions::instant(),
        }
    }

    #[test]
    fn test_edit_command_hints() {
        assert!(looks_like_edit_command("Change my EMAIL to a@b.co"));
        assert!(looks_like_edit_command("my linkedin is outdated"));
        assert!(!looks_like_edit_command("make the summary punchier"));
    }

    #[tokio::test]
    async fn test_field_edit_takes_fast_path() {
        let model = Arc::new(ScriptedModel::replying("unused"));
        let (backend, _) = backend(model.clone());
        let session = EditorSession::new(RESUME);

        let outcome = session
            .handle_instruction(&backend, instruction("change my email to jane@doe.com"))
            .await
            .unwrap();

        match outcome {
            InstructionOutcome::FieldEdited {
                message,
                edit,
                events,
            } => {
                assert_eq!(
                    message,
                    "I've updated your email from \"jane.old@example.com\" to \"jane@doe.com\"."
                );
                assert_eq!(edit.new_value, "jane@doe.com");
                assert!(matches!(events.first(), Some(ViewEvent::ScrollTo { .. })));
                assert!(events.iter().any(|e| matches!(e, ViewEvent::Insert { .. })));
            }
            other => panic!("expected field edit, got {other:?}"),
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(session.document().contains("\\email{jane@doe.com}"));
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_field_edits_do_not_accumulate_events() {
        let model = Arc::new(ScriptedModel::replying("unused"));
        let (backend, _) = backend(model);
        let session = EditorSession::new(RESUME);

        let mut trace_lengths = Vec::new();
        for i in 0..50 {
            let text = format!("change my email to user{i}@example.com");
            match session
                .handle_instruction(&backend, instruction(&text))
                .await
                .unwrap()
            {
                InstructionOutcome::FieldEdited { events, .. } => trace_lengths.push(events.len()),
                other => panic!("expected field edit, got {other:?}"),
            }
            session.replace_document(session.document()).unwrap();
        }

        assert!(trace_lengths.iter().all(|&n| n > 0 && n < 100));
        // Only the Reset from the last replace remains pending.
        assert_eq!(session.executor().take_events(), vec![ViewEvent::Reset]);
    }

    #[tokio::test]
    async fn test_unresolved_edit_falls_through_to_chat() {
        let model = Arc::new(ScriptedModel::replying(
            "Here you go:\n```latex\nPython, Rust\n```",
        ));
        let (backend, feedback) = backend(model.clone());
        let session = EditorSession::new(RESUME);

        // "update" is an edit hint, but no field keyword matches.
        let outcome = session
            .handle_instruction(&backend, instruction("update my skills with rust"))
            .await
            .unwrap();

        let reply = match outcome {
            InstructionOutcome::Replied(reply) => reply,
            other => panic!("expected chat reply, got {other:?}"),
        };
        let update = reply.update.unwrap();
        assert_eq!(update.update_type, UpdateType::Section);
        assert_eq!(update.section.as_deref(), Some("skills"));
        assert!(reply.conversation_id.is_some());
        assert!(!reply.cached);
        assert!(session
            .document()
            .contains("\\begin{rSection}{SKILLS}\n\nPython, Rust\n\n\\end{rSection}"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(feedback.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_plain_reply_leaves_document_unchanged() {
        let model = Arc::new(ScriptedModel::replying("Looks solid to me."));
        let (backend, _) = backend(model);
        let session = EditorSession::new(RESUME);

        let outcome = session
            .handle_instruction(&backend, instruction("what do you think?"))
            .await
            .unwrap();
        match outcome {
            InstructionOutcome::Replied(reply) => {
                assert_eq!(reply.update, None);
                assert_eq!(reply.warning, None);
            }
            other => panic!("expected chat reply, got {other:?}"),
        }
        assert_eq!(session.document(), RESUME);
    }

    #[tokio::test]
    async fn test_non_latex_code_block_warns() {
        let model = Arc::new(ScriptedModel::replying("```\nsomething\n```"));
        let (backend, _) = backend(model);
        let session = EditorSession::new(RESUME);

        let outcome = session
            .handle_instruction(&backend, instruction("what do you think?"))
            .await
            .unwrap();
        match outcome {
            InstructionOutcome::Replied(reply) => {
                assert_eq!(reply.warning.as_deref(), Some(EXTRACTION_WARNING))
            }
            other => panic!("expected chat reply, got {other:?}"),
        }
        assert_eq!(session.document(), RESUME);
    }

    #[tokio::test]
    async fn test_identical_request_is_served_from_cache() {
        let model = Arc::new(ScriptedModel::replying("No changes needed."));
        let (backend, _) = backend(model.clone());
        let session = EditorSession::new(RESUME);

        session
            .handle_instruction(&backend, instruction("any advice?"))
            .await
            .unwrap();
        // Same document, same prior turns, same instruction.
        session.history.lock().unwrap().clear();
        let second = session
            .handle_instruction(&backend, instruction("any advice?"))
            .await
            .unwrap();

        assert!(matches!(second, InstructionOutcome::Replied(ChatReply { cached: true, .. })));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.cache_stats().size, 1);

        session.clear_cache();
        assert_eq!(session.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_validation_error() {
        let model = Arc::new(ScriptedModel::replying("unused"));
        let (backend, _) = backend(model);
        let session = EditorSession::new(RESUME);

        let mut request = instruction("any advice?");
        request.api_key = None;
        let err = session.handle_instruction(&backend, request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates_without_mutation() {
        let model = Arc::new(ScriptedModel {
            reply: Err(500),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let (backend, feedback) = backend(model);
        let session = EditorSession::new(RESUME);

        let err = session
            .handle_instruction(&backend, instruction("any advice?"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
        assert_eq!(session.document(), RESUME);
        assert!(session.history().is_empty());
        assert_eq!(feedback.conversation_count(), 0);
        assert!(!session.chat_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_a_no_op_on_the_document() {
        let model = Arc::new(ScriptedModel {
            reply: Ok("```latex\n\\documentclass{x}\n```".into()),
            delay: Duration::from_secs(30),
            calls: AtomicUsize::new(0),
        });
        let (backend, feedback) = backend(model);
        let session = Arc::new(EditorSession::new(RESUME));

        let running = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .handle_instruction(&backend, instruction("rewrite everything"))
                    .await
            })
        };
        while !session.chat_in_flight() {
            tokio::task::yield_now().await;
        }
        assert!(session.cancel_chat());

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, InstructionOutcome::Cancelled);
        assert_eq!(session.document(), RESUME);
        assert!(session.history().is_empty());
        assert_eq!(feedback.conversation_count(), 0);
        assert!(!session.chat_in_flight());
        assert!(!session.cancel_chat());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_chat_right_after_cancel_is_not_cancelled() {
        let model = Arc::new(ScriptedModel {
            reply: Ok("ok".into()),
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let (backend, _) = backend(model);
        let backend = Arc::new(backend);
        let session = Arc::new(EditorSession::new(RESUME));

        let first = {
            let (session, backend) = (session.clone(), backend.clone());
            tokio::spawn(async move {
                session
                    .handle_instruction(&backend, instruction("first question"))
                    .await
            })
        };
        while !session.chat_in_flight() {
            tokio::task::yield_now().await;
        }
        assert!(session.cancel_chat());

        // The cancelled call has not unwound yet when the next one claims the slot.
        let second = session
            .handle_instruction(&backend, instruction("second question"))
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), InstructionOutcome::Cancelled);
        match second {
            InstructionOutcome::Replied(reply) => assert_eq!(reply.message, "ok"),
            other => panic!("expected chat reply, got {other:?}"),
        }
        assert!(!session.chat_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_chat_while_one_in_flight_is_busy() {
        let model = Arc::new(ScriptedModel {
            reply: Ok("ok".into()),
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let (backend, _) = backend(model);
        let backend = Arc::new(backend);
        let session = Arc::new(EditorSession::new(RESUME));

        let running = {
            let (session, backend) = (session.clone(), backend.clone());
            tokio::spawn(async move {
                session
                    .handle_instruction(&backend, instruction("first question"))
                    .await
            })
        };
        while !session.chat_in_flight() {
            tokio::task::yield_now().await;
        }

        let err = session
            .handle_instruction(&backend, instruction("second question"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Busy(_)));

        assert!(matches!(
            running.await.unwrap().unwrap(),
            InstructionOutcome::Replied(_)
        ));
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = SessionRegistry::new();
        let session = registry.create("doc");
        assert_eq!(registry.get(session.id).unwrap().document(), "doc");

        assert!(registry.remove(session.id).is_some());
        assert!(registry.get(session.id).is_none());
        assert!(registry.remove(session.id).is_none());
    }

    #[test]
    fn test_history_is_capped() {
        let session = EditorSession::new("doc");
        for i in 0..(MAX_STORED_TURNS + 7) {
            session.push_turns([ConversationTurn::new(Role::User, format!("{i}"))]);
        }
        let history = session.history();
        assert_eq!(history.len(), MAX_STORED_TURNS);
        assert_eq!(history[0].content, "7");
    }
}
