use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;

use crate::models::{Corpus, RankedResult, ScopeFilter};
use crate::search::bm25::{self, Bm25Params};
use crate::search::query::{parse_query, FtsQuery, ParsedQuery};
use crate::search::stats::CorpusStatsCache;
use crate::search::store::{DocumentStore, TextHit};

/// How many full-text candidates to fetch per requested result.
const CANDIDATE_MULTIPLIER: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct KeywordParams {
    pub bm25: Bm25Params,
    /// Share of the combined score taken by the store's native rank; BM25
    /// gets the rest.
    pub native_weight: f32,
}

impl Default for KeywordParams {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            native_weight: 0.5,
        }
    }
}

/// Full-text retrieval re-scored with BM25.
pub struct KeywordEngine {
    store: Arc<dyn DocumentStore>,
    stats: Arc<CorpusStatsCache>,
    params: KeywordParams,
}

impl KeywordEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        stats: Arc<CorpusStatsCache>,
        params: KeywordParams,
    ) -> Self {
        Self {
            store,
            stats,
            params,
        }
    }

    /// Keyword search over one corpus. Returns at most `limit` results with
    /// 1-indexed `keyword_rank`; an unparseable query returns nothing.
    pub async fn search(
        &self,
        corpus: Corpus,
        query: &str,
        limit: usize,
        scope: &ScopeFilter,
        fuzzy: bool,
    ) -> Result<Vec<RankedResult>> {
        let parsed = parse_query(query);
        self.search_parsed(corpus, &parsed, limit, scope, fuzzy)
            .await
    }

    pub async fn search_parsed(
        &self,
        corpus: Corpus,
        parsed: &ParsedQuery,
        limit: usize,
        scope: &ScopeFilter,
        fuzzy: bool,
    ) -> Result<Vec<RankedResult>> {
        if parsed.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let fts = FtsQuery::from_parsed(parsed);
        let hits = self
            .store
            .ranked_search(corpus, &fts, limit * CANDIDATE_MULTIPLIER, scope)
            .await?;

        if hits.is_empty() {
            if fuzzy && !parsed.terms.is_empty() {
                let fuzzy_hits = self
                    .store
                    .fuzzy_search(corpus, &parsed.terms, limit, scope)
                    .await?;
                tracing::debug!(
                    corpus = %corpus,
                    count = fuzzy_hits.len(),
                    "exact keyword search empty, using fuzzy matches"
                );
                return Ok(rank_fuzzy(fuzzy_hits, limit));
            }
            return Ok(Vec::new());
        }

        let idfs = self.term_idfs(corpus, parsed).await;
        Ok(self.rescore(hits, idfs, limit))
    }

    /// IDF per distinct term. Corpus stats and every document-frequency
    /// lookup run concurrently. A failing lookup counts as df = 0; failing
    /// stats disable BM25 for this query.
    async fn term_idfs(&self, corpus: Corpus, parsed: &ParsedQuery) -> Option<(HashMap<String, f32>, f32)> {
        let terms: Vec<String> = parsed
            .distinct_terms()
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();

        let store = self.store.as_ref();
        let df_lookups = terms.iter().map(|term| async move {
            match store.document_frequency(corpus, term).await {
                Ok(df) => df,
                Err(e) => {
                    tracing::warn!(corpus = %corpus, term = %term, "document frequency failed: {e}");
                    0
                }
            }
        });

        let (stats, dfs) = tokio::join!(self.stats.get(store, corpus), join_all(df_lookups));

        let stats = match stats {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(corpus = %corpus, "corpus stats unavailable, skipping BM25: {e}");
                return None;
            }
        };

        let idfs = terms
            .into_iter()
            .zip(dfs)
            .map(|(term, df)| {
                let value = bm25::idf(stats.total_documents, df);
                (term, value)
            })
            .collect();
        Some((idfs, stats.avg_document_length))
    }

    /// Blend native rank and BM25, each scaled by its candidate-set maximum.
    fn rescore(
        &self,
        hits: Vec<TextHit>,
        idfs: Option<(HashMap<String, f32>, f32)>,
        limit: usize,
    ) -> Vec<RankedResult> {
        let bm25_scores: Vec<f32> = match &idfs {
            Some((idfs, avg_len)) => hits
                .iter()
                .map(|h| {
                    let tokens = bm25::tokenize(h.doc.text());
                    bm25::score_document(&tokens, idfs, *avg_len, self.params.bm25)
                })
                .collect(),
            None => vec![0.0; hits.len()],
        };

        let max_native = hits.iter().map(|h| h.native_rank).fold(0.0f32, f32::max);
        let max_bm25 = bm25_scores.iter().copied().fold(0.0f32, f32::max);
        let w = self.params.native_weight.clamp(0.0, 1.0);

        let mut results: Vec<RankedResult> = hits
            .into_iter()
            .zip(bm25_scores)
            .map(|(hit, bm25_score)| {
                let native_norm = if max_native > 0.0 {
                    hit.native_rank / max_native
                } else {
                    0.0
                };
                let bm25_norm = if max_bm25 > 0.0 {
                    bm25_score / max_bm25
                } else {
                    0.0
                };
                let combined = if idfs.is_some() {
                    w * native_norm + (1.0 - w) * bm25_norm
                } else {
                    native_norm
                };

                let mut r = RankedResult::new(hit.doc);
                r.excerpt = hit.excerpt;
                r.scores.ts_rank = Some(hit.native_rank);
                r.scores.bm25_score = Some(bm25_score);
                r.scores.keyword_score = Some(combined);
                r.score = combined;
                r
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key().cmp(&b.key()))
        });
        results.truncate(limit);
        for (i, r) in results.iter_mut().enumerate() {
            r.scores.keyword_rank = Some(i + 1);
        }
        results
    }
}

fn rank_fuzzy(hits: Vec<TextHit>, limit: usize) -> Vec<RankedResult> {
    let max_native = hits.iter().map(|h| h.native_rank).fold(0.0f32, f32::max);
    hits.into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, hit)| {
            let score = if max_native > 0.0 {
                hit.native_rank / max_native
            } else {
                0.0
            };
            let mut r = RankedResult::new(hit.doc);
            r.excerpt = hit.excerpt;
            r.scores.ts_rank = Some(hit.native_rank);
            r.scores.keyword_score = Some(score);
            r.scores.keyword_rank = Some(i + 1);
            r.score = score;
            r
        })
        .collect()
}
