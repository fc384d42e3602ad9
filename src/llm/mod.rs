//! Model-backed services: embeddings, chat completion, query expansion and
//! reranking.

pub mod chat;
pub mod cross_encoder;
pub mod embeddings;
pub mod listwise;
pub mod query_expand;
pub mod rerank;
