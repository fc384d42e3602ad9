use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::PerType;
use crate::search::bm25::Bm25Params;
use crate::search::hybrid::FusionParams;
use crate::search::keyword::KeywordParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// Where the embedded full-text indexes live
    pub index_dir: PathBuf,
    /// Chat-completion provider used for listwise reranking and expansion
    pub llm: LlmConfig,
    /// Embedding service configuration
    pub embedding: EmbeddingConfig,
    /// Cross-encoder reranker configuration
    pub reranker: RerankerConfig,
    /// Vector store configuration
    pub vector: VectorConfig,
    /// Ranking constants and request defaults
    pub tuning: SearchTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model for the `llm` reranker tier and query expansion
    pub chat_model: String,
    /// Model for the `llm-fast` tier
    pub fast_model: String,
    /// Model for the `llm-deep` tier
    pub deep_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            fast_model: "llama3.2:1b".to_string(),
            deep_model: "qwen2.5:14b".to_string(),
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// The openai provider is unusable without a key; ollama needs none.
    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.api_key.as_deref().is_some_and(|k| !k.is_empty()),
            _ => !self.base_url.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" (BGE-M3 embedding server), "ollama" or "openai"
    pub provider: String,
    pub base_url: String,
    pub model: String,
    /// Embedding vector dimension
    pub dim: usize,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            base_url: "http://localhost:8000".to_string(),
            model: "BAAI/bge-m3".to_string(),
            dim: 1024,
            api_key: None,
        }
    }
}

/// Configuration for the cross-encoder reranker sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Base URL for the reranker API (e.g. "http://127.0.0.1:8082").
    /// If None, the cross-encoder strategy reports itself unconfigured.
    pub base_url: Option<String>,
    /// Model name to send in the rerank request.
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30).
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Qdrant REST endpoint. Without it an in-memory store is used.
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    /// Collection name per corpus
    pub collections: PerType<String>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            qdrant_url: None,
            qdrant_api_key: None,
            collections: PerType {
                books: "pages".to_string(),
                ayahs: "ayahs".to_string(),
                hadiths: "hadiths".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTuning {
    /// Base semantic similarity threshold, raised for short queries
    pub similarity_cutoff: f32,
    /// Candidates per content type handed to the reranker
    pub pre_rerank_limit: usize,
    /// Fuzzy keyword fallback when exact matching finds nothing
    pub fuzzy: bool,
    /// Weight of the BM25 confirmation bonus on semantic hits
    pub confirmation_weight: f32,
    /// `k` in the `score / (score + k)` BM25 squash
    pub bm25_norm_k: f32,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    /// Share of the keyword score taken by the store's native rank
    pub native_rank_weight: f32,
    pub rrf_k: f32,
    /// Fusion weight of generated alternate queries
    pub expansion_weight: f32,
    pub max_expansions: usize,
    pub stats_ttl_secs: u64,
    pub expansion_cache_ttl_secs: u64,
    pub expansion_cache_capacity: usize,
    /// Book ids and collection slugs never returned
    pub excluded_sources: Vec<String>,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            similarity_cutoff: 0.25,
            pre_rerank_limit: 30,
            fuzzy: true,
            confirmation_weight: 0.15,
            bm25_norm_k: 5.0,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            native_rank_weight: 0.5,
            rrf_k: 60.0,
            expansion_weight: 0.7,
            max_expansions: 4,
            stats_ttl_secs: 60 * 60,
            expansion_cache_ttl_secs: 24 * 60 * 60,
            expansion_cache_capacity: 1000,
            excluded_sources: Vec::new(),
        }
    }
}

impl SearchTuning {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            confirmation_weight: self.confirmation_weight,
            bm25_norm_k: self.bm25_norm_k,
            rrf_k: self.rrf_k,
        }
    }

    pub fn keyword_params(&self) -> KeywordParams {
        KeywordParams {
            bm25: Bm25Params {
                k1: self.bm25_k1,
                b: self.bm25_b,
            },
            native_weight: self.native_rank_weight,
        }
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }

    pub fn expansion_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.expansion_cache_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            index_dir: PathBuf::from("./data/index"),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            reranker: RerankerConfig::default(),
            vector: VectorConfig::default(),
            tuning: SearchTuning::default(),
        }
    }
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TURATH_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("TURATH_INDEX_DIR") {
            config.index_dir = PathBuf::from(dir);
        }

        // LLM config
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_FAST_MODEL") {
            config.llm.fast_model = model;
        }
        if let Ok(model) = std::env::var("LLM_DEEP_MODEL") {
            config.llm.deep_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }

        // Embedding config
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(dim) = std::env::var("EMBEDDING_DIM") {
            if let Ok(d) = dim.parse() {
                config.embedding.dim = d;
            }
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(key);
        }

        // Reranker config
        if let Ok(url) = std::env::var("RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("RERANKER_MODEL") {
            config.reranker.model = Some(model);
        }
        if let Ok(val) = std::env::var("RERANKER_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.reranker.timeout_secs = v.min(30); // Cap at 30s
            }
        }

        // Vector store config
        if let Ok(url) = std::env::var("QDRANT_URL") {
            config.vector.qdrant_url = Some(url);
        }
        if let Ok(key) = std::env::var("QDRANT_API_KEY") {
            config.vector.qdrant_api_key = Some(key);
        }
        if let Ok(name) = std::env::var("QDRANT_PAGES_COLLECTION") {
            config.vector.collections.books = name;
        }
        if let Ok(name) = std::env::var("QDRANT_AYAHS_COLLECTION") {
            config.vector.collections.ayahs = name;
        }
        if let Ok(name) = std::env::var("QDRANT_HADITHS_COLLECTION") {
            config.vector.collections.hadiths = name;
        }

        // Search tuning
        if let Ok(val) = std::env::var("TURATH_SIMILARITY_CUTOFF") {
            if let Ok(v) = val.parse() {
                config.tuning.similarity_cutoff = v;
            }
        }
        if let Ok(val) = std::env::var("TURATH_PRE_RERANK_LIMIT") {
            if let Ok(v) = val.parse() {
                config.tuning.pre_rerank_limit = v;
            }
        }
        if let Ok(val) = std::env::var("TURATH_FUZZY") {
            if let Ok(v) = val.parse() {
                config.tuning.fuzzy = v;
            }
        }
        if let Ok(val) = std::env::var("TURATH_EXCLUDED_SOURCES") {
            config.tuning.excluded_sources = parse_list(&val);
        }

        config
    }
}
