use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::models::{Corpus, PerType};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Records in the full-text index per content type
    pub documents: PerType<u64>,
    pub vector_store: &'static str,
    pub llm_configured: bool,
    pub cross_encoder_configured: bool,
}

/// GET /api/health
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, String)> {
    let store = state.store.clone();
    let documents = tokio::task::spawn_blocking(move || -> anyhow::Result<PerType<u64>> {
        let mut counts = PerType::default();
        for corpus in Corpus::ALL {
            *counts.get_mut(corpus) = store.document_count(corpus)?;
        }
        Ok(counts)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Index error: {e}")))?
    .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, format!("Index error: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok",
        documents,
        vector_store: state.vectors.name(),
        llm_configured: state.config.llm.is_configured(),
        cross_encoder_configured: state.config.reranker.base_url.is_some(),
    }))
}

/// Config response with API keys redacted
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub llm_provider: String,
    pub llm_base_url: String,
    pub chat_model: String,
    pub fast_model: String,
    pub deep_model: String,
    pub has_llm_api_key: bool,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub reranker_model: Option<String>,
    pub reranker_timeout_secs: u64,
    pub vector_store: &'static str,
    pub collections: PerType<String>,
    pub similarity_cutoff: f32,
    pub pre_rerank_limit: usize,
    pub fuzzy: bool,
    pub excluded_sources: Vec<String>,
}

/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        llm_provider: config.llm.provider.clone(),
        llm_base_url: config.llm.base_url.clone(),
        chat_model: config.llm.chat_model.clone(),
        fast_model: config.llm.fast_model.clone(),
        deep_model: config.llm.deep_model.clone(),
        has_llm_api_key: config.llm.api_key.is_some(),
        embedding_provider: config.embedding.provider.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_dim: config.embedding.dim,
        reranker_model: config.reranker.model.clone(),
        reranker_timeout_secs: config.reranker.timeout_secs,
        vector_store: state.vectors.name(),
        collections: config.vector.collections.clone(),
        similarity_cutoff: config.tuning.similarity_cutoff,
        pre_rerank_limit: config.tuning.pre_rerank_limit,
        fuzzy: config.tuning.fuzzy,
        excluded_sources: config.tuning.excluded_sources.clone(),
    })
}
