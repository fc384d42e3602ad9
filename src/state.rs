use std::sync::Arc;

use crate::config::Config;
use crate::llm::chat::HttpChatClient;
use crate::llm::cross_encoder::CrossEncoderClient;
use crate::llm::embeddings::{Embedder, HttpEmbedder};
use crate::search::fulltext::TantivyStore;
use crate::search::pipeline::{SearchPipeline, Services};
use crate::search::vector::{MemoryVectorStore, QdrantVectorStore, VectorStore};

/// Where semantic vectors live. Only the in-memory store is written by
/// this service; Qdrant collections are populated externally.
#[derive(Clone)]
pub enum VectorBackend {
    Memory(Arc<MemoryVectorStore>),
    Qdrant(Arc<QdrantVectorStore>),
}

impl VectorBackend {
    pub fn as_store(&self) -> Arc<dyn VectorStore> {
        match self {
            VectorBackend::Memory(store) => store.clone(),
            VectorBackend::Qdrant(store) => store.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VectorBackend::Memory(_) => "memory",
            VectorBackend::Qdrant(_) => "qdrant",
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<TantivyStore>,
    pub vectors: VectorBackend,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: Arc<SearchPipeline>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.index_dir)?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let store = Arc::new(TantivyStore::open_or_create(&config.index_dir)?);

        let vectors = match &config.vector.qdrant_url {
            Some(url) => VectorBackend::Qdrant(Arc::new(QdrantVectorStore::new(
                http_client.clone(),
                url,
                config.vector.qdrant_api_key.clone(),
            ))),
            None => VectorBackend::Memory(Arc::new(MemoryVectorStore::new())),
        };

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            http_client.clone(),
            config.embedding.clone(),
        ));
        let chat = Arc::new(HttpChatClient::new(http_client.clone(), config.llm.clone()));

        // No request timeout here: the reranker enforces the cross-encoder budget.
        let cross_encoder = match &config.reranker.base_url {
            Some(_) => Some(Arc::new(CrossEncoderClient::new(
                reqwest::Client::builder()
                    .connect_timeout(std::time::Duration::from_secs(10))
                    .build()?,
                config.reranker.clone(),
            ))),
            None => None,
        };

        if !config.llm.is_configured() {
            tracing::warn!("LLM provider not configured: expansion and listwise reranking disabled");
        }

        let pipeline = SearchPipeline::from_services(
            Services {
                store: store.clone(),
                vectors: vectors.as_store(),
                embedder: embedder.clone(),
                chat,
                cross_encoder,
            },
            &config,
        );

        Ok(Self {
            config,
            store,
            vectors,
            embedder,
            pipeline: Arc::new(pipeline),
            http_client,
        })
    }
}
