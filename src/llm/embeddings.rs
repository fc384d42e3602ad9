use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;

/// Maximum characters to send per text to the embedding API. BGE-M3 has an
/// 8 192-token context; Arabic runs about 1 token per 2 chars.
const MAX_EMBED_CHARS: usize = 8_000;

/// The local embedding server rejects larger batches.
const LOCAL_BATCH_SIZE: usize = 32;

/// Truncate `text` to at most `MAX_EMBED_CHARS` bytes, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Text-to-vector service. Queries and passages may be embedded
/// differently by asymmetric models.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a search query.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed passages, output parallel with `texts`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embedding client for the configured provider.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: EmbeddingConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_for_embedding(text);
        match self.config.provider.as_str() {
            "local" => embed_local_query(&self.client, &self.config, text).await,
            _ => self
                .embed_batch(&[text.to_string()])
                .await?
                .into_iter()
                .next()
                .context("No embedding returned"),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let embeddings = match self.config.provider.as_str() {
            "local" => embed_local_batch(&self.client, &self.config, &truncated).await?,
            "ollama" => embed_ollama(&self.client, &self.config, &truncated).await?,
            "openai" => embed_openai(&self.client, &self.config, &truncated).await?,
            other => anyhow::bail!("Unknown embedding provider: {other}"),
        };

        if embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding service returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            );
        }
        Ok(embeddings)
    }
}

// ─── Local BGE-M3 server ─────────────────────────────────

#[derive(Serialize)]
struct LocalEmbedRequest<'a> {
    text: &'a str,
    text_type: &'static str,
}

#[derive(Deserialize)]
struct LocalEmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct LocalBatchRequest<'a> {
    texts: &'a [String],
    text_type: &'static str,
}

#[derive(Deserialize)]
struct LocalBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_local_query(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let url = format!("{}/embed", config.base_url);
    let req = LocalEmbedRequest {
        text,
        text_type: "query",
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call embedding server")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Embedding server returned {status}: {body}");
    }

    let body: LocalEmbedResponse = resp
        .json()
        .await
        .context("Failed to parse embedding server response")?;
    Ok(body.embedding)
}

async fn embed_local_batch(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/embed/batch", config.base_url);
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(LOCAL_BATCH_SIZE) {
        let req = LocalBatchRequest {
            texts: chunk,
            text_type: "passage",
        };

        let resp = client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to call embedding server batch API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Embedding server batch API returned {status}: {body}");
        }

        let body: LocalBatchResponse = resp
            .json()
            .await
            .context("Failed to parse embedding server batch response")?;
        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to silently truncate inputs that exceed the model's context
    /// length instead of returning a 400 error.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url);
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(32) {
        let req = OllamaEmbedRequest {
            model: config.model.clone(),
            input: chunk.to_vec(),
            truncate: true,
        };

        let resp = client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to call Ollama embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embed API returned {status}: {body}");
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;

        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config
        .api_key
        .as_deref()
        .context("EMBEDDING_API_KEY is not set")?;

    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(64) {
        let req = OpenAiEmbedRequest {
            model: config.model.clone(),
            input: chunk.to_vec(),
        };

        let resp = client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embed API returned {status}: {body}");
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse OpenAI embed response")?;

        all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
    }

    Ok(all_embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(provider: &str, base_url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            base_url: base_url.to_string(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "ب".repeat(MAX_EMBED_CHARS);
        let out = truncate_for_embedding(&text);
        assert!(out.len() <= MAX_EMBED_CHARS);
        assert!(out.chars().all(|c| c == 'ب'));
        assert_eq!(truncate_for_embedding("short"), "short");
    }

    #[tokio::test]
    async fn test_local_query_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_partial_json(serde_json::json!({"text_type": "query"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"embedding": [0.1, 0.2]})),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(reqwest::Client::new(), config("local", &server.uri()));
        let v = embedder.embed("الصبر").await.unwrap();
        assert_eq!(v, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_local_batch_uses_passage_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed/batch"))
            .and(body_partial_json(serde_json::json!({"text_type": "passage"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]}),
            ))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(reqwest::Client::new(), config("local", &server.uri()));
        let vs = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vs.len(), 2);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"embeddings": [[1.0]]})),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(reqwest::Client::new(), config("ollama", &server.uri()));
        let err = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 texts"));
    }

    #[tokio::test]
    async fn test_server_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(reqwest::Client::new(), config("local", &server.uri()));
        let err = embedder.embed("x").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let embedder = HttpEmbedder::new(reqwest::Client::new(), config("nope", "http://x"));
        assert!(embedder.embed_batch(&["a".to_string()]).await.is_err());
    }
}
