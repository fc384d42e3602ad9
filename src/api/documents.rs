use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::models::{Corpus, CorpusDoc};
use crate::state::{AppState, VectorBackend};

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub documents: Vec<CorpusDoc>,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub indexed: usize,
    /// Documents given vectors in the in-memory vector store
    pub embedded: usize,
}

/// POST /api/documents - Add or replace records in the full-text index and,
/// when vectors are held in memory, embed them too.
pub async fn index_documents(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, (StatusCode, String)> {
    if req.documents.is_empty() {
        return Ok(Json(IndexResponse {
            indexed: 0,
            embedded: 0,
        }));
    }

    let store = state.store.clone();
    let docs = req.documents;
    let (indexed, docs) = tokio::task::spawn_blocking(move || {
        store.index_documents(&docs).map(|n| (n, docs))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Indexing error: {e}")))?
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Indexing error: {e}")))?;

    state.pipeline.invalidate_stats();

    let embedded = match &state.vectors {
        VectorBackend::Memory(vectors) => {
            let texts: Vec<String> = docs.iter().map(|d| d.text().to_string()).collect();
            match state.embedder.embed_batch(&texts).await {
                Ok(embeddings) => {
                    for (doc, embedding) in docs.iter().zip(embeddings) {
                        vectors.upsert(
                            state.config.vector.collections.get(doc.corpus()),
                            &doc.key().to_string(),
                            embedding,
                            doc.to_payload(),
                        );
                    }
                    docs.len()
                }
                Err(e) => {
                    tracing::warn!("Embedding failed, documents are keyword-only: {e:#}");
                    0
                }
            }
        }
        VectorBackend::Qdrant(_) => 0,
    };

    tracing::info!(indexed, embedded, "documents indexed");
    Ok(Json(IndexResponse { indexed, embedded }))
}

/// DELETE /api/documents/{corpus} - Remove every record of one content type.
pub async fn clear_corpus(
    State(state): State<AppState>,
    Path(corpus): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let corpus = Corpus::parse(&corpus)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown content type: {corpus}")))?;

    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.clear(corpus))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if let VectorBackend::Memory(vectors) = &state.vectors {
        vectors.clear(state.config.vector.collections.get(corpus));
    }

    state.pipeline.invalidate_stats();
    tracing::info!(corpus = %corpus, "corpus cleared");
    Ok(StatusCode::NO_CONTENT)
}
