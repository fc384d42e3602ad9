use axum::routing::{delete, get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use turath_search::api;
use turath_search::config::Config;
use turath_search::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Index directory: {}", config.index_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
    tracing::info!(
        "Embeddings: {} {} ({})",
        config.embedding.provider,
        config.embedding.model,
        config.embedding.base_url
    );

    let state = AppState::new(config.clone())?;
    tracing::info!("Vector store: {}", state.vectors.name());

    let app = Router::new()
        .route("/api/search", post(api::search::search))
        .route("/api/documents", post(api::documents::index_documents))
        .route("/api/documents/{corpus}", delete(api::documents::clear_corpus))
        .route("/api/health", get(api::status::health))
        .route("/api/config", get(api::status::get_config))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
