mod chat;
mod compiler;
mod config;
mod db;
mod editor;
mod errors;
mod extract;
mod feedback;
mod handlers;
mod llm_client;
mod models;
mod patch;
mod routes;
mod session;
mod state;
mod template;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::compiler::TectonicCompiler;
use crate::config::Config;
use crate::db::{create_pool, ensure_schema};
use crate::extract::FileTextExtractor;
use crate::feedback::{FeedbackStore, MemoryFeedbackStore, PgFeedbackStore};
use crate::llm_client::{GeminiClient, ModelRouter, OpenRouterClient};
use crate::routes::build_router;
use crate::session::SessionRegistry;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed numeric env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting TexPilot API v{}", env!("CARGO_PKG_VERSION"));

    // Feedback store: PostgreSQL when configured, memory otherwise
    let feedback: Arc<dyn FeedbackStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            ensure_schema(&pool).await?;
            Arc::new(PgFeedbackStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; conversations and ratings are kept in memory");
            Arc::new(MemoryFeedbackStore::new())
        }
    };

    // Initialize LLM clients; gemini-* models go to Google, everything else to OpenRouter
    let llm = Arc::new(ModelRouter::new(
        Arc::new(OpenRouterClient::new()?),
        Arc::new(GeminiClient::new()?),
    ));
    info!("LLM clients initialized (default model: {})", config.default_model);
    if config.openrouter_api_key.is_none() {
        info!("No server-side OpenRouter key; chat requests must carry their own");
    }
    if config.gemini_api_key.is_none() {
        info!("No server-side Gemini key; Gemini requests must carry their own");
    }

    // Initialize compiler
    let compiler = Arc::new(TectonicCompiler::new(
        config.tectonic_bin.clone(),
        Duration::from_secs(config.compile_timeout_secs),
        config.resume_class_path.clone(),
    ));
    info!(
        "Compiler: {} (timeout {}s)",
        config.tectonic_bin, config.compile_timeout_secs
    );

    // Build app state
    let state = AppState {
        sessions: Arc::new(SessionRegistry::new()),
        llm,
        compiler,
        extractor: Arc::new(FileTextExtractor),
        feedback,
        config: config.clone(),
    };

    // Build router (body size limit is applied inside build_router)
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()), // TODO: restrict origins once the editor UI has a fixed host
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
