use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Payload equality conditions; every pair must match.
pub type PayloadFilter = Vec<(String, Value)>;

/// One nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Vector similarity service, one collection per corpus.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nearest neighbours of `vector` scoring at least `score_threshold`,
    /// best first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &PayloadFilter,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>>;
}

// ─── In-memory ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: String,
    embedding: Vec<f32>,
    payload: Value,
}

/// In-memory vector store with cosine similarity search.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<VectorEntry>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a point by id.
    pub fn upsert(&self, collection: &str, id: &str, embedding: Vec<f32>, payload: Value) {
        let mut collections = self.collections.write();
        let entries = collections.entry(collection.to_string()).or_default();
        entries.retain(|e| e.id != id);
        entries.push(VectorEntry {
            id: id.to_string(),
            embedding,
            payload,
        });
    }

    #[cfg(test)]
    fn entry_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |entries| entries.len())
    }

    pub fn clear(&self, collection: &str) {
        self.collections.write().remove(collection);
    }
}

fn payload_matches(payload: &Value, filter: &PayloadFilter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| payload.get(key) == Some(expected))
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &PayloadFilter,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let collections = self.collections.read();
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .filter(|e| payload_matches(&e.payload, filter))
            .map(|e| (cosine_similarity(vector, &e.embedding), e))
            .filter(|(score, _)| *score >= score_threshold)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, e)| VectorMatch {
                id: e.id.clone(),
                score,
                payload: e.payload.clone(),
            })
            .collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

// ─── Qdrant ─────────────────────────────────────────────────────────────

/// Qdrant over its REST API.
pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantPoint>,
}

#[derive(Deserialize)]
struct QdrantPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Value,
}

impl QdrantVectorStore {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

fn qdrant_filter(filter: &PayloadFilter) -> Value {
    let must: Vec<Value> = filter
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect();
    json!({ "must": must })
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &PayloadFilter,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let url = format!("{}/collections/{collection}/points/search", self.base_url);

        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "score_threshold": score_threshold,
        });
        if !filter.is_empty() {
            body["filter"] = qdrant_filter(filter);
        }

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }

        let resp = req.send().await.context("Failed to reach Qdrant")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Qdrant search returned {status}: {body}");
        }

        let data: QdrantSearchResponse = resp
            .json()
            .await
            .context("Failed to parse Qdrant search response")?;

        Ok(data
            .result
            .into_iter()
            .map(|p| VectorMatch {
                id: match p.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: p.score,
                payload: p.payload,
            })
            .collect())
    }
}
