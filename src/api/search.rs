use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::models::{SearchRequest, SearchResponse};
use crate::search::pipeline::SearchFailure;
use crate::state::AppState;

/// POST /api/search - Hybrid search over books, Quran and hadith:
///   1. Direct lookup of famous verses and hadith, run alongside retrieval
///   2. Keyword (BM25 re-scored) + semantic search per content type
///   3. Confirmation-bonus fusion, or expansion + weighted RRF in refine mode
///   4. Optional reranking with fallback to fusion order (refine mode)
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    match state.pipeline.search(req).await {
        Ok(resp) => Ok(Json(resp)),
        Err(SearchFailure::EmptyQuery) => {
            Err((StatusCode::BAD_REQUEST, "Query is required".to_string()))
        }
        Err(e @ SearchFailure::AllMethodsFailed) => {
            Err((StatusCode::SERVICE_UNAVAILABLE, format!("Search unavailable: {e}")))
        }
    }
}
