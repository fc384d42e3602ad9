//! # turath-search
//!
//! Hybrid search over three corpora of classical Islamic texts: pages of
//! Arabic books, Quran verses and hadith narrations. Lexical BM25 search
//! and embedding similarity are fused per content type, optionally
//! broadened by LLM query expansion and reordered by a reranker.
//!
//! ## Architecture
//!
//! ```text
//!                          ┌──────────────┐
//!                          │  User Query  │
//!                          └──────┬───────┘
//!                                 │
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!  ┌───────────────┐     ┌─────────────────┐    ┌─────────────────┐
//!  │ Direct Lookup │     │   Quick mode    │    │   Refine mode   │
//!  │ famous verses │     │ original query  │    │ LLM expansion   │
//!  │ and hadith    │     │ only            │    │ original ×1.0   │
//!  └───────┬───────┘     └────────┬────────┘    │ alternates ×0.7 │
//!          │                      │             └────────┬────────┘
//!          │                      ▼                      ▼
//!          │        ┌───────────────────────────────────────────┐
//!          │        │  per query, per content type, concurrent  │
//!          │        │  keyword: full-text + BM25 re-score       │
//!          │        │  semantic: embedding, adaptive cutoff     │
//!          │        └─────────────────────┬─────────────────────┘
//!          │                              ▼
//!          │        ┌───────────────────────────────────────────┐
//!          │        │  Fusion                                   │
//!          │        │  semantic + 0.15 × BM25/(BM25+5) bonus    │
//!          │        │  refine: weighted RRF across variants     │
//!          │        └─────────────────────┬─────────────────────┘
//!          │                              ▼
//!          │        ┌───────────────────────────────────────────┐
//!          │        │  Rerank (refine mode)                     │
//!          │        │  embedding-sim / cross-encoder / listwise │
//!          │        │  timeout → keep fusion order              │
//!          │        └─────────────────────┬─────────────────────┘
//!          │                              │
//!          └──────────────┬───────────────┘
//!                         ▼
//!          ┌───────────────────────────────┐
//!          │ Prepend direct hits, dedupe,  │
//!          │ drop deny-listed sources,     │
//!          │ truncate per content type     │
//!          └───────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for services and ranking constants
//! - [`models`] - Corpus records, result identity, score card, request/response types
//! - [`cache`] - TTL cache with an injectable clock
//! - [`search::normalize`] - Arabic text normalization shared by indexing and queries
//! - [`search::query`] - Quoted-phrase query parsing and full-text query rendering
//! - [`search::fulltext`] - Embedded tantivy full-text store, one index per corpus
//! - [`search::keyword`] - Full-text retrieval re-scored with BM25
//! - [`search::semantic`] - Vector retrieval with skip rules and adaptive cutoff
//! - [`search::hybrid`] - Confirmation-bonus fusion and weighted multi-query RRF
//! - [`search::lookup`] - Famous-source direct lookup
//! - [`search::pipeline`] - Quick and refine orchestration
//! - [`llm::embeddings`] - Embedding clients (local BGE-M3 server, Ollama, OpenAI)
//! - [`llm::query_expand`] - Cached LLM query expansion
//! - [`llm::rerank`] - Reranking strategies with per-strategy time budgets
//! - [`api`] - Axum HTTP handlers for search, ingestion and status
//! - [`state`] - Shared application state wiring the services together

pub mod api;
pub mod cache;
pub mod config;
pub mod llm;
pub mod models;
pub mod search;
pub mod state;
