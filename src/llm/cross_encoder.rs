//! Cross-encoder reranker via OpenAI-compatible `/v1/rerank` endpoint.
//!
//! Sends a single batch request with all query-document pairs instead of
//! making N individual LLM chat calls.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::RerankerConfig;

/// Upper bound on any configured cross-encoder timeout.
const MAX_TIMEOUT_SECS: u64 = 30;

/// Result of reranking a single document.
#[derive(Debug, Clone)]
pub struct RerankResult {
    /// Index into the original documents array.
    pub index: usize,
    /// Relevance score (0.0 - 1.0 after sigmoid normalization).
    pub score: f32,
}

pub struct CrossEncoderClient {
    client: reqwest::Client,
    config: RerankerConfig,
}

impl CrossEncoderClient {
    pub fn new(client: reqwest::Client, config: RerankerConfig) -> Self {
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.base_url.is_some()
    }

    /// Time budget for one rerank call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.min(MAX_TIMEOUT_SECS))
    }

    /// Rerank documents against a query.
    ///
    /// Returns results sorted by score descending. Indices outside
    /// `documents` and repeated indices are dropped. The caller enforces
    /// the time budget.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .context("Reranker base_url not configured")?;

        let model = self.config.model.as_deref().unwrap_or("default");

        let url = format!("{}/v1/rerank", base_url.trim_end_matches('/'));

        let req_body = RerankRequest {
            model,
            query,
            documents,
            top_n,
        };

        let resp = self
            .client
            .post(&url)
            .json(&req_body)
            .send()
            .await
            .context("Failed to reach reranker endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Reranker returned {status}: {body}");
        }

        let body: RerankResponse = resp
            .json()
            .await
            .context("Failed to parse reranker response")?;

        let mut seen = vec![false; documents.len()];
        let mut results: Vec<RerankResult> = body
            .results
            .into_iter()
            .filter(|r| match seen.get_mut(r.index) {
                Some(flag) if !*flag => {
                    *flag = true;
                    true
                }
                _ => false,
            })
            .map(|r| RerankResult {
                index: r.index,
                score: sigmoid(r.relevance_score),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(results)
    }
}

/// Sigmoid normalization: maps raw logits to 0-1 range.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: Option<String>) -> CrossEncoderClient {
        CrossEncoderClient::new(
            reqwest::Client::new(),
            RerankerConfig {
                base_url,
                model: Some("bge-reranker".to_string()),
                timeout_secs: 120,
            },
        )
    }

    #[test]
    fn test_sigmoid_zero() {
        let s = sigmoid(0.0);
        assert!((s - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_extremes() {
        assert!(sigmoid(10.0) > 0.999);
        assert!(sigmoid(-10.0) < 0.001);
    }

    #[test]
    fn test_sigmoid_symmetry() {
        // sigmoid(x) + sigmoid(-x) = 1
        let x = 2.5f32;
        let sum = sigmoid(x) + sigmoid(-x);
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_timeout_is_capped() {
        assert_eq!(client(None).timeout(), Duration::from_secs(30));
        assert!(!client(None).is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_is_error() {
        let err = client(None).rerank("q", &["a".to_string()], 1).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn test_maps_and_sorts_indices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"index": 0, "relevance_score": -1.0},
                    {"index": 2, "relevance_score": 3.0},
                    {"index": 9, "relevance_score": 5.0},
                    {"index": 2, "relevance_score": 4.0},
                    {"index": 1, "relevance_score": 0.5}
                ]
            })))
            .mount(&server)
            .await;

        let docs: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let results = client(Some(server.uri())).rerank("q", &docs, 3).await.unwrap();
        let order: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(Some(server.uri()))
            .rerank("q", &["a".to_string()], 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
