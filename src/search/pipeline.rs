//! Search orchestration.
//!
//! Quick mode embeds the query once, runs keyword and semantic retrieval
//! for every enabled corpus concurrently and fuses each pair. Refine mode
//! expands the query first, retrieves for every variant concurrently,
//! fuses across variants and reranks the merged candidates. Both modes
//! prepend direct-lookup hits and drop deny-listed sources.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures_util::future::join_all;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::chat::ChatModel;
use crate::llm::cross_encoder::CrossEncoderClient;
use crate::llm::embeddings::Embedder;
use crate::llm::query_expand::{ExpansionParams, QueryExpander};
use crate::llm::rerank::{ListwiseModels, RerankTimeouts, Reranker, RerankerKind};
use crate::models::{
    Corpus, DebugStats, PerType, RankedResult, ScopeFilter, SearchMode, SearchRequest,
    SearchResponse,
};
use crate::search::hybrid::{merge_with_rrf, multi_query_rrf_fusion, FusionParams, QueryResults};
use crate::search::keyword::KeywordEngine;
use crate::search::lookup::{direct_lookup, merge_direct};
use crate::search::query::{parse_query, FtsQuery};
use crate::search::semantic::{skip_reason, SemanticEngine};
use crate::search::stats::CorpusStatsCache;
use crate::search::store::DocumentStore;
use crate::search::vector::VectorStore;

/// Largest number of results returned per content type.
const MAX_LIMIT: usize = 100;
/// Largest candidate pool retrieved per method and content type.
const MAX_CANDIDATES: usize = 200;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SearchFailure {
    #[error("query is empty")]
    EmptyQuery,
    #[error("every retrieval method failed")]
    AllMethodsFailed,
}

/// The external services a pipeline is built from.
pub struct Services {
    pub store: Arc<dyn DocumentStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub cross_encoder: Option<Arc<CrossEncoderClient>>,
}

pub struct SearchPipeline {
    keyword: KeywordEngine,
    semantic: SemanticEngine,
    reranker: Reranker,
    expander: QueryExpander,
    store: Arc<dyn DocumentStore>,
    stats: Arc<CorpusStatsCache>,
    fusion: FusionParams,
    similarity_cutoff: f32,
    pre_rerank_limit: usize,
    fuzzy: bool,
    excluded_sources: Vec<String>,
}

// ─── Request-local bookkeeping ─────────────────────────

/// Request knobs after per-request overrides are applied.
#[derive(Debug, Clone)]
struct RequestParams {
    corpora: Vec<Corpus>,
    limit: usize,
    candidates: usize,
    cutoff: f32,
    fuzzy: bool,
    scope: ScopeFilter,
}

/// What one query variant retrieved from one corpus. `semantic` is
/// `None` when semantic search was not attempted.
struct CorpusRetrieval {
    corpus: Corpus,
    keyword: Result<Vec<RankedResult>>,
    semantic: Option<Result<Vec<RankedResult>>>,
}

struct QueryRetrieval {
    embedding_failed: bool,
    embedding_ms: u64,
    corpora: Vec<CorpusRetrieval>,
}

/// Attempts and failures of every retrieval method in a request.
#[derive(Default)]
struct MethodLog {
    attempted: usize,
    succeeded: usize,
    failed: Vec<String>,
    keyword_hits: PerType<usize>,
    semantic_hits: PerType<usize>,
}

impl MethodLog {
    fn succeed(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    fn fail(&mut self, method: String) {
        self.attempted += 1;
        if !self.failed.contains(&method) {
            self.failed.push(method);
        }
    }

    fn all_failed(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }

    /// Fuse one corpus's keyword and semantic lists. A failed method
    /// contributes no results.
    fn fuse(&mut self, retrieval: CorpusRetrieval, params: FusionParams) -> Vec<RankedResult> {
        let corpus = retrieval.corpus;

        let keyword = match retrieval.keyword {
            Ok(hits) => {
                self.succeed();
                *self.keyword_hits.get_mut(corpus) += hits.len();
                hits
            }
            Err(e) => {
                tracing::warn!(corpus = %corpus, "keyword search failed: {e:#}");
                self.fail(format!("keyword:{corpus}"));
                Vec::new()
            }
        };

        let semantic = match retrieval.semantic {
            Some(Ok(hits)) => {
                self.succeed();
                *self.semantic_hits.get_mut(corpus) += hits.len();
                hits
            }
            Some(Err(e)) => {
                tracing::warn!(corpus = %corpus, "semantic search failed: {e:#}");
                self.fail(format!("semantic:{corpus}"));
                Vec::new()
            }
            None => Vec::new(),
        };

        merge_with_rrf(semantic, keyword, params)
    }

    fn fuse_query(&mut self, retrieval: QueryRetrieval, params: FusionParams) -> PerType<Vec<RankedResult>> {
        if retrieval.embedding_failed {
            self.fail("embedding".to_string());
        }
        let mut fused = PerType::default();
        for corpus_retrieval in retrieval.corpora {
            let corpus = corpus_retrieval.corpus;
            *fused.get_mut(corpus) = self.fuse(corpus_retrieval, params);
        }
        fused
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Unknown names fall back to no reranking.
fn reranker_kind(requested: Option<&str>) -> RerankerKind {
    match requested {
        None => RerankerKind::None,
        Some(name) => RerankerKind::parse(name).unwrap_or_else(|| {
            tracing::warn!(reranker = name, "unknown reranker, keeping fusion order");
            RerankerKind::None
        }),
    }
}

// ─── Pipeline ──────────────────────────────────────────

impl SearchPipeline {
    pub fn from_services(services: Services, config: &Config) -> Self {
        let tuning = &config.tuning;
        let stats = Arc::new(CorpusStatsCache::new(tuning.stats_ttl()));

        let keyword = KeywordEngine::new(services.store.clone(), stats.clone(), tuning.keyword_params());
        let semantic = SemanticEngine::new(
            services.embedder.clone(),
            services.vectors,
            config.vector.collections.clone(),
        );
        let reranker = Reranker::new(
            services.embedder,
            services.chat.clone(),
            services.cross_encoder,
            ListwiseModels::from(&config.llm),
        );
        let expander = QueryExpander::new(
            services.chat,
            config.llm.chat_model.clone(),
            ExpansionParams {
                weight: tuning.expansion_weight,
                max_expansions: tuning.max_expansions,
                cache_ttl: tuning.expansion_cache_ttl(),
                cache_capacity: tuning.expansion_cache_capacity,
            },
        );

        Self {
            keyword,
            semantic,
            reranker,
            expander,
            store: services.store,
            stats,
            fusion: tuning.fusion_params(),
            similarity_cutoff: tuning.similarity_cutoff,
            pre_rerank_limit: tuning.pre_rerank_limit,
            fuzzy: tuning.fuzzy,
            excluded_sources: tuning.excluded_sources.clone(),
        }
    }

    pub fn with_rerank_timeouts(mut self, timeouts: RerankTimeouts) -> Self {
        self.reranker = self.reranker.with_timeouts(timeouts);
        self
    }

    /// Drop cached corpus statistics after the indexed documents change.
    pub fn invalidate_stats(&self) {
        self.stats.invalidate();
    }

    /// Run one search request. Only an empty query, or the failure of
    /// every retrieval method with no direct-lookup hit, is an error.
    pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse, SearchFailure> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("search", request_id = %request_id);
        self.run(req, request_id).instrument(span).await
    }

    async fn run(&self, req: SearchRequest, request_id: String) -> Result<SearchResponse, SearchFailure> {
        let started = Instant::now();
        let query = req.query.trim().to_string();
        if query.is_empty() {
            return Err(SearchFailure::EmptyQuery);
        }

        let refine = req.refine || req.mode == SearchMode::Refine;
        let params = self.request_params(&req);
        let kind = if refine {
            reranker_kind(req.reranker.as_deref())
        } else {
            RerankerKind::None
        };

        let fts = FtsQuery::from_parsed(&parse_query(&query));
        let mut debug = DebugStats {
            request_id,
            mode: if refine { SearchMode::Refine } else { SearchMode::Quick },
            fts_query: (!fts.is_empty()).then(|| fts.to_string()),
            semantic_skipped: skip_reason(&query).map(|s| s.to_string()),
            reranker: kind.to_string(),
            ..DebugStats::default()
        };
        let mut log = MethodLog::default();

        let mode = &debug.mode;
        tracing::info!(query = %query, mode = ?mode, reranker = %kind, "search started");

        let (direct, mut results) = tokio::join!(self.lookup(&query, &params), async {
            if refine {
                self.refine(&query, &params, kind, &mut debug, &mut log).await
            } else {
                self.quick(&query, &params, &mut debug, &mut log).await
            }
        });

        if log.all_failed() && direct.is_empty() {
            tracing::warn!(failed = ?log.failed, "every retrieval method failed");
            return Err(SearchFailure::AllMethodsFailed);
        }

        for &corpus in &params.corpora {
            let list = std::mem::take(results.get_mut(corpus));
            let here: Vec<RankedResult> = direct
                .iter()
                .filter(|r| r.corpus() == corpus)
                .cloned()
                .collect();
            let mut merged: Vec<RankedResult> = merge_direct(list, &here)
                .into_iter()
                .filter(|r| !self.is_excluded(r))
                .collect();
            merged.truncate(params.limit);
            for r in merged.iter_mut().filter(|r| !r.direct_lookup) {
                r.match_type = Some(r.classify_match());
            }
            *results.get_mut(corpus) = merged;
        }

        debug.direct_lookup_hits = direct.len();
        debug.keyword_hits = log.keyword_hits;
        debug.semantic_hits = log.semantic_hits;
        debug.failed_methods = log.failed;
        debug.timings.total_ms = elapsed_ms(started);

        let total_ms = debug.timings.total_ms;
        tracing::info!(
            books = results.books.len(),
            ayahs = results.ayahs.len(),
            hadiths = results.hadiths.len(),
            total_ms = total_ms,
            "search complete"
        );

        Ok(SearchResponse {
            query,
            results,
            debug,
        })
    }

    async fn quick(
        &self,
        query: &str,
        params: &RequestParams,
        debug: &mut DebugStats,
        log: &mut MethodLog,
    ) -> PerType<Vec<RankedResult>> {
        let t = Instant::now();
        let retrieval = self.retrieve_query(query, params).await;
        debug.timings.embedding_ms = retrieval.embedding_ms;
        debug.timings.retrieval_ms = elapsed_ms(t);

        let t = Instant::now();
        let fused = log.fuse_query(retrieval, self.fusion);
        debug.timings.fusion_ms = elapsed_ms(t);
        fused
    }

    async fn refine(
        &self,
        query: &str,
        params: &RequestParams,
        kind: RerankerKind,
        debug: &mut DebugStats,
        log: &mut MethodLog,
    ) -> PerType<Vec<RankedResult>> {
        let t = Instant::now();
        let expansions = self.expander.expand(query).await;
        debug.timings.expansion_ms = elapsed_ms(t);
        tracing::info!(variants = expansions.len(), "query expanded");

        let t = Instant::now();
        let retrievals = join_all(
            expansions
                .iter()
                .map(|e| self.retrieve_query(&e.query, params)),
        )
        .await;
        debug.timings.embedding_ms = retrievals.iter().map(|r| r.embedding_ms).max().unwrap_or(0);
        debug.timings.retrieval_ms = elapsed_ms(t);

        let t = Instant::now();
        let mut per_query: Vec<(f32, PerType<Vec<RankedResult>>)> = expansions
            .iter()
            .zip(retrievals)
            .map(|(e, r)| (e.weight, log.fuse_query(r, self.fusion)))
            .collect();

        let mut fused: PerType<Vec<RankedResult>> = PerType::default();
        for &corpus in &params.corpora {
            let lists: Vec<QueryResults> = per_query
                .iter_mut()
                .map(|(weight, lists)| QueryResults {
                    results: std::mem::take(lists.get_mut(corpus)),
                    weight: *weight,
                })
                .collect();
            *fused.get_mut(corpus) = multi_query_rrf_fusion(&lists, self.fusion, params.candidates)
                .into_iter()
                .filter(|r| !self.is_excluded(r))
                .collect();
        }
        debug.timings.fusion_ms = elapsed_ms(t);
        debug.expanded_queries = expansions;

        let t = Instant::now();
        let outcome = self
            .reranker
            .rerank_all(query, fused, params.candidates, params.limit, kind)
            .await;
        debug.timings.rerank_ms = elapsed_ms(t);
        debug.reranker_timed_out = outcome.timed_out;
        if outcome.timed_out {
            tracing::warn!(reranker = %kind, "reranker timed out, returning fusion order");
        }
        outcome.results
    }

    /// Embed one query variant (unless the skip rules apply) and search
    /// every enabled corpus with it.
    async fn retrieve_query(&self, query: &str, params: &RequestParams) -> QueryRetrieval {
        let t = Instant::now();
        let mut embedding_failed = false;
        let embedding = match skip_reason(query) {
            Some(reason) => {
                tracing::debug!(query, "semantic search skipped: {reason}");
                None
            }
            None => match self.semantic.embed_query(query).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(query, "query embedding failed, semantic search skipped: {e:#}");
                    embedding_failed = true;
                    None
                }
            },
        };
        let embedding_ms = elapsed_ms(t);

        let corpora = join_all(
            params
                .corpora
                .iter()
                .map(|&corpus| self.retrieve(corpus, query, embedding.as_deref(), params)),
        )
        .await;

        QueryRetrieval {
            embedding_failed,
            embedding_ms,
            corpora,
        }
    }

    async fn retrieve(
        &self,
        corpus: Corpus,
        query: &str,
        embedding: Option<&[f32]>,
        params: &RequestParams,
    ) -> CorpusRetrieval {
        let keyword = self
            .keyword
            .search(corpus, query, params.candidates, &params.scope, params.fuzzy);
        let semantic = async {
            match embedding {
                Some(v) => Some(
                    self.semantic
                        .search(corpus, query, params.candidates, &params.scope, params.cutoff, Some(v))
                        .await,
                ),
                None => None,
            }
        };
        let (keyword, semantic) = tokio::join!(keyword, semantic);
        CorpusRetrieval {
            corpus,
            keyword,
            semantic,
        }
    }

    async fn lookup(&self, query: &str, params: &RequestParams) -> Vec<RankedResult> {
        match direct_lookup(self.store.as_ref(), query).await {
            Ok(hits) => hits
                .into_iter()
                .filter(|r| params.corpora.contains(&r.corpus()))
                .collect(),
            Err(e) => {
                tracing::warn!("direct lookup failed: {e:#}");
                Vec::new()
            }
        }
    }

    fn request_params(&self, req: &SearchRequest) -> RequestParams {
        let limit = req.limit.min(MAX_LIMIT);
        RequestParams {
            corpora: req.content_types.enabled(),
            limit,
            candidates: req
                .pre_rerank_limit
                .unwrap_or(self.pre_rerank_limit)
                .max(limit)
                .min(MAX_CANDIDATES),
            cutoff: req.similarity_cutoff.unwrap_or(self.similarity_cutoff),
            fuzzy: req.fuzzy.unwrap_or(self.fuzzy),
            scope: req.scope.clone(),
        }
    }

    fn is_excluded(&self, result: &RankedResult) -> bool {
        result
            .doc
            .source_id()
            .is_some_and(|id| self.excluded_sources.iter().any(|x| x == id))
    }
}
