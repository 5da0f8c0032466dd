//! Axum route handlers for the editor API.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::CacheStats;
use crate::editor::{AnimationOptions, EditSuccess, ViewEvent};
use crate::errors::AppError;
use crate::extract::FileKind;
use crate::llm_client::catalog::{available_models, ModelInfo};
use crate::llm_client::Provider;
use crate::models::conversation::UploadedFile;
use crate::patch::field_locator::{apply_field_match, locate_field};
use crate::patch::{resolve_update, FieldLookup, FieldMatch, UpdateResult};
use crate::session::{EditorSession, Instruction, InstructionOutcome};
use crate::state::AppState;
use crate::template::{load_template, TEMPLATE_NAME};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub document: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub document: String,
}

#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    pub document: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub session_id: Uuid,
    pub document: String,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub instruction: String,
    #[serde(default)]
    pub options: AnimationOptions,
}

#[derive(Debug, Serialize)]
pub struct ParseEditResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_match: Option<FieldMatch>,
    /// Document as it would read after the edit, without touching the buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub result: EditSuccess,
    pub document: String,
    pub events: Vec<ViewEvent>,
}

#[derive(Debug, Deserialize)]
pub struct InstructionRequest {
    pub instruction: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFile>,
    #[serde(default)]
    pub options: AnimationOptions,
}

#[derive(Debug, Serialize)]
pub struct InstructionResponse {
    #[serde(flatten)]
    pub outcome: InstructionOutcome,
    /// Live document after the instruction. Omitted when the call was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResolvePatchRequest {
    pub document: String,
    pub reply: String,
    #[serde(default)]
    pub instruction: String,
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub document: String,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub pdf_base64: String,
    pub size_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct CompilerStatusResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TemplateResponse {
    pub name: &'static str,
    pub template: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelsQuery {
    /// `all` (default), `openrouter`, `gemini` or `google`.
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderCounts {
    pub openrouter: usize,
    pub gemini: usize,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub total: usize,
    pub providers: ProviderCounts,
    pub default_model: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateKeyRequest {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateKeyResponse {
    pub valid: bool,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_name: String,
    pub kind: FileKind,
    pub text: String,
    pub char_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub conversation_id: Uuid,
    pub rating: i32,
    #[serde(default)]
    pub was_helpful: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub conversation_id: Uuid,
    pub status: &'static str,
}

fn find_session(state: &AppState, id: Uuid) -> Result<Arc<EditorSession>, AppError> {
    state
        .sessions
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}

// ────────────────────────────────────────────────────────────────────────────
// Sessions and documents
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    request: Option<Json<CreateSessionRequest>>,
) -> (StatusCode, Json<SessionResponse>) {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let session = state.sessions.create(request.document.unwrap_or_default());
    (
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: session.id,
            created_at: session.created_at,
            document: session.document(),
        }),
    )
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .sessions
        .remove(id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}

/// GET /api/v1/sessions/:id/document
pub async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let session = find_session(&state, id)?;
    Ok(Json(DocumentResponse {
        session_id: id,
        document: session.document(),
    }))
}

/// PUT /api/v1/sessions/:id/document
///
/// Rejected with 409 while an animated edit is running on the same buffer.
pub async fn handle_put_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DocumentRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    let session = find_session(&state, id)?;
    session.replace_document(request.document)?;
    Ok(Json(DocumentResponse {
        session_id: id,
        document: session.document(),
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Field edits
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/sessions/:id/edit/parse
///
/// Read-only preview of what an edit command would touch.
pub async fn handle_parse_edit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EditRequest>,
) -> Result<Json<ParseEditResponse>, AppError> {
    let session = find_session(&state, id)?;
    // One snapshot, so the match offsets and the preview agree with each other.
    let document = session.document();
    let response = match locate_field(&document, &request.instruction) {
        FieldLookup::Found(m) => ParseEditResponse {
            found: true,
            preview: apply_field_match(&document, &m),
            field_match: Some(m),
            reason: None,
        },
        FieldLookup::NotFound { reason } => ParseEditResponse {
            found: false,
            field_match: None,
            preview: None,
            reason: Some(reason),
        },
    };
    Ok(Json(response))
}

/// POST /api/v1/sessions/:id/edit
///
/// Runs the animated replace and returns the view-event trace it produced.
pub async fn handle_execute_edit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EditRequest>,
) -> Result<Json<EditResponse>, AppError> {
    if request.instruction.trim().is_empty() {
        return Err(AppError::Validation("instruction cannot be empty".to_string()));
    }
    let session = find_session(&state, id)?;
    let executor = session.executor();

    // Drop events from earlier document replacements.
    executor.take_events();
    let result = executor
        .execute_edit_command(&request.instruction, request.options)
        .await?;

    Ok(Json(EditResponse {
        result,
        document: executor.document(),
        events: executor.take_events(),
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Instructions and chat
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/sessions/:id/instruction
///
/// Field-edit fast path, falling back to the LLM chat path.
pub async fn handle_instruction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<InstructionRequest>,
) -> Result<Json<InstructionResponse>, AppError> {
    if request.instruction.trim().is_empty() {
        return Err(AppError::Validation("instruction cannot be empty".to_string()));
    }
    let session = find_session(&state, id)?;

    let model_id = request
        .model_id
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&state.config.default_model);

    let outcome = session
        .handle_instruction(
            &state.chat_backend(),
            Instruction {
                text: &request.instruction,
                model_id,
                api_key: state.config.api_key(model_id, request.api_key.as_deref()),
                uploaded_files: &request.uploaded_files,
                animation: request.options,
            },
        )
        .await?;

    let document = match outcome {
        InstructionOutcome::Cancelled => None,
        _ => Some(session.document()),
    };
    Ok(Json(InstructionResponse { outcome, document }))
}

/// POST /api/v1/sessions/:id/chat/cancel
pub async fn handle_cancel_chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let session = find_session(&state, id)?;
    Ok(Json(CancelResponse {
        cancelled: session.cancel_chat(),
    }))
}

/// GET /api/v1/sessions/:id/cache
pub async fn handle_cache_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CacheStats>, AppError> {
    let session = find_session(&state, id)?;
    Ok(Json(session.cache_stats()))
}

/// DELETE /api/v1/sessions/:id/cache
pub async fn handle_clear_cache(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let session = find_session(&state, id)?;
    session.clear_cache();
    Ok(StatusCode::NO_CONTENT)
}

// ────────────────────────────────────────────────────────────────────────────
// Stateless operations
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/patch/resolve
pub async fn handle_resolve_patch(
    Json(request): Json<ResolvePatchRequest>,
) -> Json<UpdateResult> {
    Json(resolve_update(
        &request.document,
        &request.reply,
        &request.instruction,
    ))
}

/// POST /api/v1/latex/compile
pub async fn handle_compile(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> Result<Json<CompileResponse>, AppError> {
    if request.document.trim().is_empty() {
        return Err(AppError::Validation("document cannot be empty".to_string()));
    }
    let pdf = state.compiler.compile(&request.document).await?;
    info!(size_bytes = pdf.len(), "document compiled");

    Ok(Json(CompileResponse {
        size_bytes: pdf.len(),
        pdf_base64: base64::engine::general_purpose::STANDARD.encode(&pdf),
    }))
}

/// GET /api/v1/system/compiler
pub async fn handle_compiler_status(
    State(state): State<AppState>,
) -> Json<CompilerStatusResponse> {
    let status = match state.compiler.version().await {
        Ok(version) => CompilerStatusResponse {
            available: true,
            version: Some(version),
            error: None,
        },
        Err(e) => {
            warn!("compiler unavailable: {e}");
            CompilerStatusResponse {
                available: false,
                version: None,
                error: Some(e.to_string()),
            }
        }
    };
    Json(status)
}

/// GET /api/v1/latex/template
pub async fn handle_template(
    State(state): State<AppState>,
) -> Result<Json<TemplateResponse>, AppError> {
    let template = load_template(state.config.template_path.as_deref()).await?;
    Ok(Json(TemplateResponse {
        name: TEMPLATE_NAME,
        template,
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Models and keys
// ────────────────────────────────────────────────────────────────────────────

fn parse_provider(raw: &str) -> Result<Provider, AppError> {
    raw.parse::<Provider>().map_err(AppError::Validation)
}

/// GET /api/v1/ai/models
pub async fn handle_list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<ModelsResponse>, AppError> {
    let provider = match query.provider.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(parse_provider(raw)?),
    };

    let models = available_models(provider);
    let count = |p: Provider| models.iter().filter(|m| m.provider == p).count();
    let providers = ProviderCounts {
        openrouter: count(Provider::OpenRouter),
        gemini: count(Provider::Gemini),
    };

    Ok(Json(ModelsResponse {
        total: models.len(),
        models,
        providers,
        default_model: state.config.default_model.clone(),
    }))
}

/// POST /api/v1/ai/validate-key
///
/// A malformed or rejected key is a normal `valid: false` answer, not an error.
pub async fn handle_validate_key(
    State(state): State<AppState>,
    Json(request): Json<ValidateKeyRequest>,
) -> Result<Json<ValidateKeyResponse>, AppError> {
    let api_key = request.api_key.trim();
    if api_key.is_empty() {
        return Err(AppError::Validation("API key is required".to_string()));
    }
    let provider = match request.provider.as_deref() {
        Some(raw) => parse_provider(raw)?,
        None => Provider::OpenRouter,
    };
    let label = provider.label();

    let rejected = |error: String| ValidateKeyResponse {
        valid: false,
        provider,
        message: None,
        error: Some(error),
    };

    if !api_key.starts_with(provider.key_prefix()) {
        return Ok(Json(rejected(format!(
            "Invalid {label} API key format. Should start with \"{}\"",
            provider.key_prefix()
        ))));
    }

    match state.llm.verify_key(provider, api_key).await {
        Ok(()) => Ok(Json(ValidateKeyResponse {
            valid: true,
            provider,
            message: Some(format!("{label} API key is valid")),
            error: None,
        })),
        Err(e) => {
            warn!(provider = label, "API key rejected: {e}");
            Ok(Json(rejected(format!("Invalid {label} API key: {e}"))))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Uploads and feedback
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/upload
///
/// Takes the first multipart field carrying a file name.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let kind = FileKind::from_file_name(&file_name)?;
        let bytes: Bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;

        let extractor = state.extractor.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, kind))
            .await
            .map_err(|e| anyhow::anyhow!("extraction task failed: {e}"))??;

        info!(%file_name, ?kind, chars = text.len(), "upload extracted");
        return Ok(Json(UploadResponse {
            char_count: text.chars().count(),
            file_name,
            kind,
            text,
        }));
    }

    Err(AppError::Validation("No file provided".to_string()))
}

/// POST /api/v1/feedback
pub async fn handle_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackResponse>), AppError> {
    state
        .feedback
        .rate(request.conversation_id, request.rating, request.was_helpful)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(FeedbackResponse {
            conversation_id: request.conversation_id,
            status: "recorded",
        }),
    ))
}
