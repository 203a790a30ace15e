use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Level};

use engine::stores::{IdentityTranslator, InMemoryBundle, NoopMemoryHooks, StaticToolRegistry};
use engine::upstream::gemini::{GeminiClient, GeminiConfig};
use engine::{ConversationEngine, PromptCache};
use gateway::routes::{create_router, AppState};
use gateway::tools::tool_declarations;
use gateway::Config;
use inference::HybridInferenceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("starting saubari gateway");

    let config = Config::from_env();

    let mut gemini_config = GeminiConfig::new(config.gemini_api_key.clone());
    gemini_config.tool_declarations = tool_declarations();
    // Configuration problems are fatal here, never at request time.
    let upstream = Arc::new(GeminiClient::new(gemini_config)?);

    let manager = Arc::new(HybridInferenceManager::new(config.hybrid_config()));

    // Process-local doubles; deployment wires the external history,
    // profile and catalog services in their place.
    let bundle = InMemoryBundle::new();
    let registry = Arc::new(StaticToolRegistry::new());

    let prompt_cache = Arc::new(PromptCache::new(Duration::from_secs(60 * 60)));
    let template = config.system_prompt.clone();
    prompt_cache.spawn_refresh(Duration::from_secs(5 * 60), move |_| template.clone());

    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&manager),
        upstream,
        bundle.history.clone(),
        bundle.profiles.clone(),
        registry,
        Arc::new(NoopMemoryHooks),
        Arc::new(IdentityTranslator),
        prompt_cache,
        config.engine_config(),
    ));

    let state = Arc::new(AppState {
        engine,
        manager,
        primary_model: config.primary_model.clone(),
        active_streams: AtomicUsize::new(0),
    });
    let app = create_router(state);

    let addr = config.socket_addr()?;
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
