use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Corpus, CorpusDoc, DocKey, ScopeFilter};
use crate::search::query::FtsQuery;

/// A candidate returned by the full-text store.
#[derive(Debug, Clone)]
pub struct TextHit {
    pub doc: CorpusDoc,
    /// The store's own relevance score (ts-rank style, small positive).
    pub native_rank: f32,
    /// Short highlighted excerpt around the match.
    pub excerpt: Option<String>,
}

/// Corpus-wide numbers BM25 needs for IDF and length normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorpusStats {
    pub total_documents: u64,
    pub avg_document_length: f32,
}

/// The relational full-text capability the keyword engine and direct
/// lookup run against.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Execute a phrase/OR query, best native rank first.
    async fn ranked_search(
        &self,
        corpus: Corpus,
        query: &FtsQuery,
        limit: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<TextHit>>;

    /// Approximate matching on loose terms. Lower precision, higher recall.
    async fn fuzzy_search(
        &self,
        corpus: Corpus,
        terms: &[String],
        limit: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<TextHit>>;

    /// Number of documents in `corpus` containing `term`.
    async fn document_frequency(&self, corpus: Corpus, term: &str) -> Result<u64>;

    async fn corpus_stats(&self, corpus: Corpus) -> Result<CorpusStats>;

    /// Exact records by identity. Missing keys are skipped; order follows `keys`.
    async fn fetch(&self, keys: &[DocKey]) -> Result<Vec<CorpusDoc>>;
}
