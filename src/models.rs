use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One of the three searchable corpora.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    Pages,
    Ayahs,
    Hadiths,
}

impl Corpus {
    pub const ALL: [Corpus; 3] = [Corpus::Pages, Corpus::Ayahs, Corpus::Hadiths];

    pub fn as_str(&self) -> &'static str {
        match self {
            Corpus::Pages => "pages",
            Corpus::Ayahs => "ayahs",
            Corpus::Hadiths => "hadiths",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pages" => Some(Corpus::Pages),
            "ayahs" => Some(Corpus::Ayahs),
            "hadiths" => Some(Corpus::Hadiths),
            _ => None,
        }
    }

    /// Label shown to the listwise reranker when corpora are mixed.
    pub fn label(&self) -> &'static str {
        match self {
            Corpus::Pages => "BOOK",
            Corpus::Ayahs => "QURAN",
            Corpus::Hadiths => "HADITH",
        }
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single page of a classical book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPage {
    pub book_id: String,
    pub page_number: u32,
    #[serde(default)]
    pub book_title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub text: String,
}

/// A Quran verse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ayah {
    pub surah_number: u32,
    pub ayah_number: u32,
    #[serde(default)]
    pub surah_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub translation: Option<String>,
}

/// A narration from a hadith collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hadith {
    pub collection_slug: String,
    pub hadith_number: String,
    #[serde(default)]
    pub collection_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub translation: Option<String>,
}

/// A stored record from any corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorpusDoc {
    Page(BookPage),
    Ayah(Ayah),
    Hadith(Hadith),
}

impl CorpusDoc {
    pub fn corpus(&self) -> Corpus {
        match self {
            CorpusDoc::Page(_) => Corpus::Pages,
            CorpusDoc::Ayah(_) => Corpus::Ayahs,
            CorpusDoc::Hadith(_) => Corpus::Hadiths,
        }
    }

    pub fn key(&self) -> DocKey {
        match self {
            CorpusDoc::Page(p) => DocKey::Page {
                book_id: p.book_id.clone(),
                page_number: p.page_number,
            },
            CorpusDoc::Ayah(a) => DocKey::Ayah {
                surah: a.surah_number,
                ayah: a.ayah_number,
            },
            CorpusDoc::Hadith(h) => DocKey::Hadith {
                collection: h.collection_slug.clone(),
                number: h.hadith_number.clone(),
            },
        }
    }

    pub fn text(&self) -> &str {
        match self {
            CorpusDoc::Page(p) => &p.text,
            CorpusDoc::Ayah(a) => &a.text,
            CorpusDoc::Hadith(h) => &h.text,
        }
    }

    /// Source identifier checked against the quality deny-list.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            CorpusDoc::Page(p) => Some(&p.book_id),
            CorpusDoc::Hadith(h) => Some(&h.collection_slug),
            CorpusDoc::Ayah(_) => None,
        }
    }

    /// Text handed to rerankers: the record plus whatever title or
    /// translation it carries.
    pub fn rerank_text(&self) -> String {
        match self {
            CorpusDoc::Page(p) => match &p.book_title {
                Some(title) => format!("{title} (p. {}): {}", p.page_number, p.text),
                None => p.text.clone(),
            },
            CorpusDoc::Ayah(a) => {
                let mut out = format!("[{}:{}] {}", a.surah_number, a.ayah_number, a.text);
                if let Some(t) = &a.translation {
                    out.push_str(" | ");
                    out.push_str(t);
                }
                out
            }
            CorpusDoc::Hadith(h) => {
                let name = h.collection_name.as_deref().unwrap_or(&h.collection_slug);
                let mut out = format!("{name} #{}: {}", h.hadith_number, h.text);
                if let Some(t) = &h.translation {
                    out.push_str(" | ");
                    out.push_str(t);
                }
                out
            }
        }
    }

    /// Decode a vector-store payload for the given corpus.
    pub fn from_payload(corpus: Corpus, payload: serde_json::Value) -> Result<Self> {
        let doc = match corpus {
            Corpus::Pages => CorpusDoc::Page(
                serde_json::from_value(payload).context("Invalid book page payload")?,
            ),
            Corpus::Ayahs => {
                CorpusDoc::Ayah(serde_json::from_value(payload).context("Invalid ayah payload")?)
            }
            Corpus::Hadiths => CorpusDoc::Hadith(
                serde_json::from_value(payload).context("Invalid hadith payload")?,
            ),
        };
        Ok(doc)
    }

    /// Encode as a flat vector-store payload (no type tag).
    pub fn to_payload(&self) -> serde_json::Value {
        let value = match self {
            CorpusDoc::Page(p) => serde_json::to_value(p),
            CorpusDoc::Ayah(a) => serde_json::to_value(a),
            CorpusDoc::Hadith(h) => serde_json::to_value(h),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Stable identity of a record across retrieval methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocKey {
    Page { book_id: String, page_number: u32 },
    Ayah { surah: u32, ayah: u32 },
    Hadith { collection: String, number: String },
}

impl DocKey {
    pub fn corpus(&self) -> Corpus {
        match self {
            DocKey::Page { .. } => Corpus::Pages,
            DocKey::Ayah { .. } => Corpus::Ayahs,
            DocKey::Hadith { .. } => Corpus::Hadiths,
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::Page {
                book_id,
                page_number,
            } => write!(f, "{book_id}/{page_number}"),
            DocKey::Ayah { surah, ayah } => write!(f, "{surah}:{ayah}"),
            DocKey::Hadith { collection, number } => write!(f, "{collection}:{number}"),
        }
    }
}

/// Optional scope restriction applied to both retrieval methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub book_id: Option<String>,
    pub collection: Option<String>,
    pub surah: Option<u32>,
}

/// Every score a candidate can pick up on its way through the pipeline.
/// `None` means the method did not find the candidate, not a zero score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_rank: Option<usize>,
    /// Combined native-rank + BM25 score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_rank: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fused_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Both,
    Semantic,
    Keyword,
}

/// A candidate in a ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    pub doc: CorpusDoc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(flatten)]
    pub scores: ScoreCard,
    /// Final ranking score.
    pub score: f32,
    #[serde(default)]
    pub direct_lookup: bool,
    /// Which retrieval methods found the result; unset for direct hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
}

impl RankedResult {
    pub fn new(doc: CorpusDoc) -> Self {
        Self {
            doc,
            excerpt: None,
            scores: ScoreCard::default(),
            score: 0.0,
            direct_lookup: false,
            match_type: None,
        }
    }

    pub fn key(&self) -> DocKey {
        self.doc.key()
    }

    pub fn corpus(&self) -> Corpus {
        self.doc.corpus()
    }

    pub fn classify_match(&self) -> MatchType {
        match (self.scores.semantic_rank, self.scores.keyword_rank) {
            (Some(_), Some(_)) => MatchType::Both,
            (Some(_), None) => MatchType::Semantic,
            _ => MatchType::Keyword,
        }
    }
}

/// An alternate phrasing of a query with its fusion weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub query: String,
    pub weight: f32,
    pub reason: String,
}

/// Holds one value per corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerType<T> {
    pub books: T,
    pub ayahs: T,
    pub hadiths: T,
}

impl<T> PerType<T> {
    pub fn get(&self, corpus: Corpus) -> &T {
        match corpus {
            Corpus::Pages => &self.books,
            Corpus::Ayahs => &self.ayahs,
            Corpus::Hadiths => &self.hadiths,
        }
    }

    pub fn get_mut(&mut self, corpus: Corpus) -> &mut T {
        match corpus {
            Corpus::Pages => &mut self.books,
            Corpus::Ayahs => &mut self.ayahs,
            Corpus::Hadiths => &mut self.hadiths,
        }
    }
}

/// Which corpora a request searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypes {
    #[serde(default = "default_true")]
    pub books: bool,
    #[serde(default = "default_true")]
    pub ayahs: bool,
    #[serde(default = "default_true")]
    pub hadiths: bool,
}

impl Default for ContentTypes {
    fn default() -> Self {
        Self {
            books: true,
            ayahs: true,
            hadiths: true,
        }
    }
}

impl ContentTypes {
    pub fn enabled(&self) -> Vec<Corpus> {
        Corpus::ALL
            .into_iter()
            .filter(|c| self.includes(*c))
            .collect()
    }

    pub fn includes(&self, corpus: Corpus) -> bool {
        match corpus {
            Corpus::Pages => self.books,
            Corpus::Ayahs => self.ayahs,
            Corpus::Hadiths => self.hadiths,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Keyword + semantic + fusion, no model calls after retrieval.
    #[default]
    Quick,
    /// Query expansion, multi-query fusion and reranking.
    Refine,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub content_types: ContentTypes,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// `none`, `embedding-sim`, `cross-encoder`, `llm-fast`, `llm` or `llm-deep`.
    #[serde(default)]
    pub reranker: Option<String>,
    pub similarity_cutoff: Option<f32>,
    pub pre_rerank_limit: Option<usize>,
    pub fuzzy: Option<bool>,
    #[serde(default)]
    pub refine: bool,
    #[serde(default)]
    pub scope: ScopeFilter,
}

fn default_limit() -> usize {
    20
}

fn default_true() -> bool {
    true
}

/// Per-stage wall-clock timings in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub expansion_ms: u64,
    pub embedding_ms: u64,
    pub retrieval_ms: u64,
    pub fusion_ms: u64,
    pub rerank_ms: u64,
    pub total_ms: u64,
}

/// Telemetry returned alongside results. Degraded paths show up here
/// instead of as errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugStats {
    pub request_id: String,
    pub mode: SearchMode,
    pub fts_query: Option<String>,
    pub keyword_hits: PerType<usize>,
    pub semantic_hits: PerType<usize>,
    pub failed_methods: Vec<String>,
    pub semantic_skipped: Option<String>,
    pub expanded_queries: Vec<ExpandedQuery>,
    pub reranker: String,
    pub reranker_timed_out: bool,
    pub direct_lookup_hits: usize,
    pub timings: StageTimings,
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: PerType<Vec<RankedResult>>,
    pub debug: DebugStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ayah(s: u32, a: u32) -> CorpusDoc {
        CorpusDoc::Ayah(Ayah {
            surah_number: s,
            ayah_number: a,
            surah_name: None,
            text: "نص".to_string(),
            translation: None,
        })
    }

    #[test]
    fn test_doc_key_identity_ignores_text() {
        let mut other = ayah(2, 255);
        if let CorpusDoc::Ayah(a) = &mut other {
            a.text = "different".to_string();
        }
        assert_eq!(ayah(2, 255).key(), other.key());
        assert_ne!(ayah(2, 255).key(), ayah(2, 256).key());
    }

    #[test]
    fn test_payload_round_trip_uses_camel_case() {
        let page = CorpusDoc::Page(BookPage {
            book_id: "b42".to_string(),
            page_number: 7,
            book_title: Some("Title".to_string()),
            author: None,
            text: "text".to_string(),
        });
        let payload = page.to_payload();
        assert_eq!(payload["bookId"], "b42");
        assert_eq!(payload["pageNumber"], 7);
        let back = CorpusDoc::from_payload(Corpus::Pages, payload).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_payload_for_wrong_corpus_is_error() {
        let payload = serde_json::json!({ "bookId": "b1", "pageNumber": 1, "text": "t" });
        assert!(CorpusDoc::from_payload(Corpus::Ayahs, payload).is_err());
    }

    #[test]
    fn test_match_type_classification() {
        let mut r = RankedResult::new(ayah(1, 1));
        r.scores.keyword_rank = Some(1);
        assert_eq!(r.classify_match(), MatchType::Keyword);
        r.scores.semantic_rank = Some(3);
        assert_eq!(r.classify_match(), MatchType::Both);
        r.scores.keyword_rank = None;
        assert_eq!(r.classify_match(), MatchType::Semantic);
    }

    #[test]
    fn test_ranked_result_serializes_flat_scores() {
        let mut r = RankedResult::new(ayah(2, 255));
        r.scores.semantic_score = Some(0.8);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["semanticScore"], serde_json::json!(0.8f32));
        assert!(json.get("keywordScore").is_none());
        assert_eq!(json["doc"]["type"], "ayah");
    }
}
