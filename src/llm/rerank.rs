//! Reranking orchestration: strategy dispatch, per-strategy time budgets,
//! and fallback to the incoming (fusion) order.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::llm::chat::ChatModel;
use crate::llm::cross_encoder::CrossEncoderClient;
use crate::llm::embeddings::Embedder;
use crate::llm::listwise::{self, ListwiseDoc};
use crate::models::{Corpus, PerType, RankedResult};
use crate::search::vector::cosine_similarity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankerKind {
    #[default]
    None,
    EmbeddingSim,
    CrossEncoder,
    LlmFast,
    Llm,
    LlmDeep,
}

impl RerankerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "embedding-sim" | "embedding" => Some(Self::EmbeddingSim),
            "cross-encoder" | "cross_encoder" => Some(Self::CrossEncoder),
            "llm-fast" => Some(Self::LlmFast),
            "llm" => Some(Self::Llm),
            "llm-deep" => Some(Self::LlmDeep),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::EmbeddingSim => "embedding-sim",
            Self::CrossEncoder => "cross-encoder",
            Self::LlmFast => "llm-fast",
            Self::Llm => "llm",
            Self::LlmDeep => "llm-deep",
        }
    }

    pub fn is_listwise(&self) -> bool {
        matches!(self, Self::LlmFast | Self::Llm | Self::LlmDeep)
    }
}

impl fmt::Display for RerankerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("reranker timed out after {0:?}")]
    Timeout(Duration),
    #[error("reranker request failed: {0}")]
    Http(String),
    #[error("could not parse reranker response")]
    Parse,
    #[error("{0} reranker is not configured")]
    NotConfigured(&'static str),
}

/// Reranked candidates. `timed_out` is set only when the strategy ran
/// out of time; other failures fall back silently.
#[derive(Debug)]
pub struct RerankOutcome<R> {
    pub results: R,
    pub timed_out: bool,
}

/// Time budget per network-backed strategy.
#[derive(Debug, Clone, Copy)]
pub struct RerankTimeouts {
    pub cross_encoder: Duration,
    pub llm_fast: Duration,
    pub llm: Duration,
    pub llm_deep: Duration,
}

impl Default for RerankTimeouts {
    fn default() -> Self {
        Self {
            cross_encoder: Duration::from_secs(10),
            llm_fast: Duration::from_secs(15),
            llm: Duration::from_secs(20),
            llm_deep: Duration::from_secs(25),
        }
    }
}

/// Model name per listwise tier.
#[derive(Debug, Clone)]
pub struct ListwiseModels {
    pub fast: String,
    pub standard: String,
    pub deep: String,
}

impl From<&LlmConfig> for ListwiseModels {
    fn from(config: &LlmConfig) -> Self {
        Self {
            fast: config.fast_model.clone(),
            standard: config.chat_model.clone(),
            deep: config.deep_model.clone(),
        }
    }
}

pub struct Reranker {
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    cross_encoder: Option<Arc<CrossEncoderClient>>,
    models: ListwiseModels,
    timeouts: RerankTimeouts,
}

/// Take `top_n` candidates in the given index order.
fn pick<T>(candidates: Vec<T>, order: &[usize], top_n: usize) -> Vec<T> {
    let mut slots: Vec<Option<T>> = candidates.into_iter().map(Some).collect();
    order
        .iter()
        .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
        .take(top_n)
        .collect()
}

async fn within<F>(budget: Duration, fut: F) -> Result<Vec<usize>, RerankError>
where
    F: Future<Output = Result<Vec<usize>, RerankError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(RerankError::Timeout(budget)),
    }
}

impl Reranker {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        cross_encoder: Option<Arc<CrossEncoderClient>>,
        models: ListwiseModels,
    ) -> Self {
        let mut timeouts = RerankTimeouts::default();
        if let Some(ce) = &cross_encoder {
            timeouts.cross_encoder = ce.timeout();
        }
        Self {
            embedder,
            chat,
            cross_encoder,
            models,
            timeouts,
        }
    }

    pub fn with_timeouts(mut self, timeouts: RerankTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Rerank `candidates` and keep `top_n`. Any failure returns the first
    /// `top_n` in incoming order.
    pub async fn rerank<T, F>(
        &self,
        query: &str,
        candidates: Vec<T>,
        text_of: F,
        top_n: usize,
        kind: RerankerKind,
    ) -> RerankOutcome<Vec<T>>
    where
        F: Fn(&T) -> String,
    {
        if kind == RerankerKind::None || candidates.len() <= 1 {
            let mut results = candidates;
            results.truncate(top_n);
            return RerankOutcome {
                results,
                timed_out: false,
            };
        }

        let docs: Vec<ListwiseDoc> = candidates
            .iter()
            .map(|c| ListwiseDoc {
                label: None,
                text: text_of(c),
            })
            .collect();

        match self.rank_indices(query, &docs, top_n, kind).await {
            Ok(order) => RerankOutcome {
                results: pick(candidates, &order, top_n),
                timed_out: false,
            },
            Err(e) => {
                tracing::warn!(reranker = %kind, "rerank failed, keeping fusion order: {e}");
                let mut results = candidates;
                results.truncate(top_n);
                RerankOutcome {
                    results,
                    timed_out: matches!(e, RerankError::Timeout(_)),
                }
            }
        }
    }

    /// Rerank every content type. Up to `pool` candidates per type are
    /// sent to the strategy and at most `top_n` per type come back.
    /// Listwise strategies see all types in one labeled list so the model
    /// can compare across them; other strategies rerank each type on its
    /// own, concurrently.
    pub async fn rerank_all(
        &self,
        query: &str,
        mut candidates: PerType<Vec<RankedResult>>,
        pool: usize,
        top_n: usize,
        kind: RerankerKind,
    ) -> RerankOutcome<PerType<Vec<RankedResult>>> {
        for corpus in Corpus::ALL {
            candidates.get_mut(corpus).truncate(pool.max(top_n));
        }

        let populated = Corpus::ALL
            .iter()
            .filter(|c| !candidates.get(**c).is_empty())
            .count();

        if kind.is_listwise() && populated > 1 {
            return self.rerank_unified(query, candidates, top_n, kind).await;
        }

        let PerType {
            books,
            ayahs,
            hadiths,
        } = candidates;
        let text = |r: &RankedResult| r.doc.rerank_text();
        let (books, ayahs, hadiths) = tokio::join!(
            self.rerank(query, books, text, top_n, kind),
            self.rerank(query, ayahs, text, top_n, kind),
            self.rerank(query, hadiths, text, top_n, kind),
        );

        RerankOutcome {
            timed_out: books.timed_out || ayahs.timed_out || hadiths.timed_out,
            results: PerType {
                books: books.results,
                ayahs: ayahs.results,
                hadiths: hadiths.results,
            },
        }
    }

    async fn rerank_unified(
        &self,
        query: &str,
        candidates: PerType<Vec<RankedResult>>,
        top_n: usize,
        kind: RerankerKind,
    ) -> RerankOutcome<PerType<Vec<RankedResult>>> {
        let PerType {
            books,
            ayahs,
            hadiths,
        } = candidates;
        let merged: Vec<RankedResult> = books.into_iter().chain(ayahs).chain(hadiths).collect();

        let docs: Vec<ListwiseDoc> = merged
            .iter()
            .map(|r| ListwiseDoc {
                label: Some(r.corpus().label()),
                text: r.doc.rerank_text(),
            })
            .collect();
        let total = docs.len();

        let (order, timed_out) = match self.rank_indices(query, &docs, total, kind).await {
            Ok(order) => (order, false),
            Err(e) => {
                tracing::warn!(reranker = %kind, "unified rerank failed, keeping fusion order: {e}");
                ((0..total).collect(), matches!(e, RerankError::Timeout(_)))
            }
        };

        let mut results: PerType<Vec<RankedResult>> = PerType::default();
        for r in pick(merged, &order, total) {
            let list = results.get_mut(r.corpus());
            if list.len() < top_n {
                list.push(r);
            }
        }

        tracing::debug!(
            candidates = total,
            books = results.books.len(),
            ayahs = results.ayahs.len(),
            hadiths = results.hadiths.len(),
            "unified rerank"
        );
        RerankOutcome { results, timed_out }
    }

    /// The strategy's preferred order as indices into `docs`.
    async fn rank_indices(
        &self,
        query: &str,
        docs: &[ListwiseDoc],
        top_n: usize,
        kind: RerankerKind,
    ) -> Result<Vec<usize>, RerankError> {
        match kind {
            RerankerKind::None => Ok((0..docs.len()).collect()),
            RerankerKind::EmbeddingSim => self.order_by_embedding(query, docs, top_n).await,
            RerankerKind::CrossEncoder => {
                within(
                    self.timeouts.cross_encoder,
                    self.order_by_cross_encoder(query, docs, top_n),
                )
                .await
            }
            RerankerKind::LlmFast => {
                within(
                    self.timeouts.llm_fast,
                    self.order_listwise(query, docs, top_n, &self.models.fast),
                )
                .await
            }
            RerankerKind::Llm => {
                within(
                    self.timeouts.llm,
                    self.order_listwise(query, docs, top_n, &self.models.standard),
                )
                .await
            }
            RerankerKind::LlmDeep => {
                within(
                    self.timeouts.llm_deep,
                    self.order_listwise(query, docs, top_n, &self.models.deep),
                )
                .await
            }
        }
    }

    async fn order_by_embedding(
        &self,
        query: &str,
        docs: &[ListwiseDoc],
        top_n: usize,
    ) -> Result<Vec<usize>, RerankError> {
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let (query_vec, doc_vecs) = tokio::join!(
            self.embedder.embed(query),
            self.embedder.embed_batch(&texts)
        );
        let query_vec = query_vec.map_err(|e| RerankError::Http(format!("{e:#}")))?;
        let doc_vecs = doc_vecs.map_err(|e| RerankError::Http(format!("{e:#}")))?;

        let mut scored: Vec<(usize, f32)> = doc_vecs
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(&query_vec, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(top_n).map(|(i, _)| i).collect())
    }

    async fn order_by_cross_encoder(
        &self,
        query: &str,
        docs: &[ListwiseDoc],
        top_n: usize,
    ) -> Result<Vec<usize>, RerankError> {
        let client = self
            .cross_encoder
            .as_ref()
            .filter(|c| c.is_configured())
            .ok_or(RerankError::NotConfigured("cross-encoder"))?;

        let texts: Vec<String> = docs
            .iter()
            .map(|d| listwise::truncate_doc(&d.text))
            .collect();
        let results = client
            .rerank(query, &texts, top_n)
            .await
            .map_err(|e| RerankError::Http(format!("{e:#}")))?;

        let order: Vec<usize> = results.into_iter().map(|r| r.index).collect();
        Ok(listwise::complete_order(order, docs.len(), top_n))
    }

    async fn order_listwise(
        &self,
        query: &str,
        docs: &[ListwiseDoc],
        top_n: usize,
        model: &str,
    ) -> Result<Vec<usize>, RerankError> {
        if !self.chat.is_configured() {
            return Err(RerankError::NotConfigured("llm"));
        }

        let prompt = listwise::build_prompt(query, docs);
        let reply = self
            .chat
            .complete(model, &prompt, 0.0)
            .await
            .map_err(|e| RerankError::Http(format!("{e:#}")))?;

        let ranking = listwise::parse_ranking(&reply, docs.len()).ok_or(RerankError::Parse)?;
        Ok(listwise::complete_order(ranking, docs.len(), top_n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ayah, BookPage, CorpusDoc, Hadith};
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Instant;

    struct ScriptedChat {
        reply: String,
        delay: Duration,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedChat {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                reply: "[1]".to_string(),
                delay: Duration::from_secs(60),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, model: &str, prompt: &str, _: f32) -> Result<String> {
            self.prompts
                .lock()
                .push((model.to_string(), prompt.to_string()));
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }
    }

    /// Texts containing "best" point along the query vector.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, _: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("best") { vec![1.0, 0.1] } else { vec![0.1, 1.0] })
                .collect())
        }
    }

    fn models() -> ListwiseModels {
        ListwiseModels {
            fast: "fast-model".to_string(),
            standard: "standard-model".to_string(),
            deep: "deep-model".to_string(),
        }
    }

    fn reranker(chat: Arc<ScriptedChat>) -> Reranker {
        Reranker::new(Arc::new(KeywordEmbedder), chat, None, models()).with_timeouts(
            RerankTimeouts {
                cross_encoder: Duration::from_millis(100),
                llm_fast: Duration::from_millis(100),
                llm: Duration::from_millis(100),
                llm_deep: Duration::from_millis(100),
            },
        )
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_kind_parse_round_trip() {
        for kind in [
            RerankerKind::None,
            RerankerKind::EmbeddingSim,
            RerankerKind::CrossEncoder,
            RerankerKind::LlmFast,
            RerankerKind::Llm,
            RerankerKind::LlmDeep,
        ] {
            assert_eq!(RerankerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RerankerKind::parse("gpt"), None);
    }

    #[tokio::test]
    async fn test_none_truncates() {
        let out = reranker(ScriptedChat::replying("[]"))
            .rerank("q", strings(&["a", "b", "c"]), |s| s.clone(), 2, RerankerKind::None)
            .await;
        assert_eq!(out.results, strings(&["a", "b"]));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_listwise_reorders_and_fills() {
        let chat = ScriptedChat::replying("Ranking: [3, 1]");
        let out = reranker(chat.clone())
            .rerank("q", strings(&["a", "b", "c", "d"]), |s| s.clone(), 3, RerankerKind::Llm)
            .await;
        assert_eq!(out.results, strings(&["c", "a", "b"]));
        assert_eq!(chat.prompts.lock()[0].0, "standard-model");
    }

    #[tokio::test]
    async fn test_tier_selects_model() {
        let chat = ScriptedChat::replying("[1, 2]");
        let r = reranker(chat.clone());
        r.rerank("q", strings(&["a", "b"]), |s| s.clone(), 2, RerankerKind::LlmFast)
            .await;
        r.rerank("q", strings(&["a", "b"]), |s| s.clone(), 2, RerankerKind::LlmDeep)
            .await;
        let models: Vec<String> = chat.prompts.lock().iter().map(|p| p.0.clone()).collect();
        assert_eq!(models, vec!["fast-model", "deep-model"]);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_without_timeout_flag() {
        let out = reranker(ScriptedChat::replying("I think the second one."))
            .rerank("q", strings(&["a", "b", "c"]), |s| s.clone(), 2, RerankerKind::Llm)
            .await;
        assert_eq!(out.results, strings(&["a", "b"]));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_within_budget() {
        let started = Instant::now();
        let out = reranker(ScriptedChat::hanging())
            .rerank("q", strings(&["a", "b", "c"]), |s| s.clone(), 2, RerankerKind::LlmDeep)
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(out.timed_out);
        assert_eq!(out.results, strings(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_unconfigured_cross_encoder_falls_back() {
        let out = reranker(ScriptedChat::replying("[]"))
            .rerank("q", strings(&["a", "b"]), |s| s.clone(), 1, RerankerKind::CrossEncoder)
            .await;
        assert_eq!(out.results, strings(&["a"]));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_embedding_similarity() {
        let out = reranker(ScriptedChat::replying("[]"))
            .rerank(
                "q",
                strings(&["meh", "best match", "other"]),
                |s| s.clone(),
                2,
                RerankerKind::EmbeddingSim,
            )
            .await;
        assert_eq!(out.results[0], "best match");
        assert_eq!(out.results.len(), 2);
    }

    fn page(n: u32) -> RankedResult {
        RankedResult::new(CorpusDoc::Page(BookPage {
            book_id: "tafsir".to_string(),
            page_number: n,
            book_title: Some("Tafsir".to_string()),
            author: None,
            text: format!("commentary {n}"),
        }))
    }

    fn verse(a: u32) -> RankedResult {
        RankedResult::new(CorpusDoc::Ayah(Ayah {
            surah_number: 2,
            ayah_number: a,
            surah_name: None,
            text: format!("verse {a}"),
            translation: None,
        }))
    }

    fn hadith(n: &str) -> RankedResult {
        RankedResult::new(CorpusDoc::Hadith(Hadith {
            collection_slug: "bukhari".to_string(),
            hadith_number: n.to_string(),
            collection_name: None,
            text: format!("hadith {n}"),
            translation: None,
        }))
    }

    #[tokio::test]
    async fn test_unified_rerank_labels_and_splits() {
        // merged order: page 1, page 2, ayah 255, hadith 1
        let chat = ScriptedChat::replying("[3, 2, 4, 1]");
        let candidates = PerType {
            books: vec![page(1), page(2)],
            ayahs: vec![verse(255)],
            hadiths: vec![hadith("1")],
        };
        let out = reranker(chat.clone())
            .rerank_all("آية الكرسي", candidates, 30, 10, RerankerKind::Llm)
            .await;

        assert_eq!(chat.prompts.lock().len(), 1);
        let prompt = chat.prompts.lock()[0].1.clone();
        assert!(prompt.contains("(BOOK)"));
        assert!(prompt.contains("(QURAN)"));
        assert!(prompt.contains("(HADITH)"));

        let pages: Vec<String> = out.results.books.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(pages, vec!["tafsir/2", "tafsir/1"]);
        assert_eq!(out.results.ayahs.len(), 1);
        assert_eq!(out.results.hadiths.len(), 1);
    }

    #[tokio::test]
    async fn test_unified_rerank_respects_per_type_limit() {
        let chat = ScriptedChat::replying("[1, 2, 3]");
        let candidates = PerType {
            books: vec![page(1), page(2), page(3)],
            ayahs: vec![verse(1), verse(2)],
            hadiths: Vec::new(),
        };
        let out = reranker(chat)
            .rerank_all("q", candidates, 30, 1, RerankerKind::Llm)
            .await;
        assert_eq!(out.results.books.len(), 1);
        assert_eq!(out.results.ayahs.len(), 1);
    }

    #[tokio::test]
    async fn test_unified_rerank_timeout_keeps_each_type() {
        let candidates = PerType {
            books: vec![page(1), page(2)],
            ayahs: vec![verse(255)],
            hadiths: vec![hadith("1")],
        };
        let out = reranker(ScriptedChat::hanging())
            .rerank_all("q", candidates, 30, 10, RerankerKind::LlmFast)
            .await;
        assert!(out.timed_out);
        assert_eq!(out.results.books.len(), 2);
        assert_eq!(out.results.books[0].key(), page(1).key());
    }

    #[tokio::test]
    async fn test_single_type_listwise_uses_plain_path() {
        let chat = ScriptedChat::replying("[2, 1]");
        let candidates = PerType {
            books: vec![page(1), page(2)],
            ..PerType::default()
        };
        let out = reranker(chat.clone())
            .rerank_all("q", candidates, 30, 10, RerankerKind::Llm)
            .await;
        assert_eq!(out.results.books[0].key(), page(2).key());
        assert!(!chat.prompts.lock()[0].1.contains("(BOOK)"));
    }

    #[tokio::test]
    async fn test_unified_rerank_sends_whole_pool() {
        let chat = ScriptedChat::replying("[1]");
        let candidates = PerType {
            books: (1..=5).map(page).collect(),
            ayahs: vec![verse(255)],
            hadiths: Vec::new(),
        };
        let out = reranker(chat.clone())
            .rerank_all("q", candidates, 30, 1, RerankerKind::Llm)
            .await;

        let prompt = chat.prompts.lock()[0].1.clone();
        assert_eq!(prompt.matches("(BOOK)").count(), 5);
        assert_eq!(prompt.matches("(QURAN)").count(), 1);
        assert_eq!(out.results.books.len(), 1);
        assert_eq!(out.results.ayahs.len(), 1);
    }

    #[tokio::test]
    async fn test_pool_caps_candidates_sent() {
        let chat = ScriptedChat::replying("[1]");
        let candidates = PerType {
            books: (1..=5).map(page).collect(),
            ayahs: (1..=5).map(verse).collect(),
            hadiths: Vec::new(),
        };
        reranker(chat.clone())
            .rerank_all("q", candidates, 3, 1, RerankerKind::Llm)
            .await;

        let prompt = chat.prompts.lock()[0].1.clone();
        assert_eq!(prompt.matches("(BOOK)").count(), 3);
        assert_eq!(prompt.matches("(QURAN)").count(), 3);
    }
}
