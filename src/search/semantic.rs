//! Embedding similarity retrieval with an adaptive score threshold.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::llm::embeddings::Embedder;
use crate::models::{Corpus, CorpusDoc, PerType, RankedResult, ScopeFilter};
use crate::search::normalize::{normalize_arabic, significant_len};
use crate::search::query::parse_query;
use crate::search::vector::{PayloadFilter, VectorStore};

/// Queries shorter than this (non-space characters) are not embedded.
const MIN_SEMANTIC_CHARS: usize = 4;

/// Why semantic retrieval did not run for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticSkip {
    QuotedPhrase,
    TooShort,
}

impl fmt::Display for SemanticSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticSkip::QuotedPhrase => f.write_str("quoted phrase"),
            SemanticSkip::TooShort => f.write_str("query too short"),
        }
    }
}

/// Exact-phrase queries and near-empty queries skip semantic search.
pub fn skip_reason(query: &str) -> Option<SemanticSkip> {
    if parse_query(query).has_phrases() {
        return Some(SemanticSkip::QuotedPhrase);
    }
    if significant_len(query) < MIN_SEMANTIC_CHARS {
        return Some(SemanticSkip::TooShort);
    }
    None
}

/// Raise `base` for short queries, whose embeddings match loosely.
/// Length is counted in characters of the normalized query.
pub fn adaptive_cutoff(query: &str, base: f32) -> f32 {
    let normalized = normalize_arabic(query);
    let len = normalized.chars().count();
    let words = normalized.split_whitespace().count();

    if len <= 3 {
        base.max(0.55)
    } else if len <= 6 || words == 1 {
        base.max(0.40)
    } else if len <= 12 {
        base.max(0.30)
    } else {
        base
    }
}

/// Vector-store payload conditions for a scope, using the payload's
/// camelCase field names.
pub fn scope_payload_filter(corpus: Corpus, scope: &ScopeFilter) -> PayloadFilter {
    let mut filter = PayloadFilter::new();
    match corpus {
        Corpus::Pages => {
            if let Some(id) = &scope.book_id {
                filter.push(("bookId".to_string(), json!(id)));
            }
        }
        Corpus::Ayahs => {
            if let Some(s) = scope.surah {
                filter.push(("surahNumber".to_string(), json!(s)));
            }
        }
        Corpus::Hadiths => {
            if let Some(c) = &scope.collection {
                filter.push(("collectionSlug".to_string(), json!(c)));
            }
        }
    }
    filter
}

pub struct SemanticEngine {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    collections: PerType<String>,
}

impl SemanticEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        collections: PerType<String>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            collections,
        }
    }

    /// Embed a query for reuse across corpora.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedder.embed(query).await
    }

    /// Nearest neighbours above the adaptive cutoff, with 1-indexed
    /// `semantic_rank` in returned order. Skipped queries yield nothing.
    pub async fn search(
        &self,
        corpus: Corpus,
        query: &str,
        limit: usize,
        scope: &ScopeFilter,
        similarity_cutoff: f32,
        embedding: Option<&[f32]>,
    ) -> Result<Vec<RankedResult>> {
        if skip_reason(query).is_some() || limit == 0 {
            return Ok(Vec::new());
        }

        let cutoff = adaptive_cutoff(query, similarity_cutoff);
        let owned;
        let vector = match embedding {
            Some(v) => v,
            None => {
                owned = self.embedder.embed(query).await?;
                owned.as_slice()
            }
        };

        let filter = scope_payload_filter(corpus, scope);
        let matches = self
            .vectors
            .search(self.collections.get(corpus), vector, limit, &filter, cutoff)
            .await?;

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            let doc = match CorpusDoc::from_payload(corpus, m.payload) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(corpus = %corpus, id = %m.id, "skipping vector hit: {e:#}");
                    continue;
                }
            };
            let mut r = RankedResult::new(doc);
            r.scores.semantic_score = Some(m.score);
            r.scores.semantic_rank = Some(results.len() + 1);
            r.score = m.score;
            results.push(r);
        }

        tracing::debug!(corpus = %corpus, cutoff, count = results.len(), "semantic search");
        Ok(results)
    }
}
