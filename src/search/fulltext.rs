use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{
    BooleanQuery, ConstScoreQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, TermQuery,
};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING,
};
use tantivy::snippet::SnippetGenerator;
use tantivy::tokenizer::{
    LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer, Token, TokenFilter, TokenStream,
    Tokenizer,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::models::{Corpus, CorpusDoc, DocKey, PerType, ScopeFilter};
use crate::search::normalize::normalize_arabic;
use crate::search::query::FtsQuery;
use crate::search::store::{CorpusStats, DocumentStore, TextHit};

const WRITER_HEAP_BYTES: usize = 50_000_000;
const SNIPPET_MAX_CHARS: usize = 180;
const ARABIC_TOKENIZER: &str = "arabic";

// ─── Analyzer ──────────────────────────────────────────

/// Token filter applying [`normalize_arabic`] to each token. Offsets still
/// point into the original text, so snippets keep its diacritics.
#[derive(Clone)]
struct ArabicNormalizer;

impl TokenFilter for ArabicNormalizer {
    type Tokenizer<T: Tokenizer> = ArabicNormalizerWrapper<T>;

    fn transform<T: Tokenizer>(self, tokenizer: T) -> Self::Tokenizer<T> {
        ArabicNormalizerWrapper(tokenizer)
    }
}

#[derive(Clone)]
struct ArabicNormalizerWrapper<T>(T);

impl<T: Tokenizer> Tokenizer for ArabicNormalizerWrapper<T> {
    type TokenStream<'a> = ArabicNormalizerStream<T::TokenStream<'a>>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        ArabicNormalizerStream {
            inner: self.0.token_stream(text),
        }
    }
}

struct ArabicNormalizerStream<T> {
    inner: T,
}

impl<T: TokenStream> TokenStream for ArabicNormalizerStream<T> {
    fn advance(&mut self) -> bool {
        // Tokens made only of marks normalize to nothing and are skipped.
        while self.inner.advance() {
            let token = self.inner.token_mut();
            token.text = normalize_arabic(&token.text);
            if !token.text.is_empty() {
                return true;
            }
        }
        false
    }

    fn token(&self) -> &Token {
        self.inner.token()
    }

    fn token_mut(&mut self) -> &mut Token {
        self.inner.token_mut()
    }
}

fn arabic_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(ArabicNormalizer)
        .filter(LowerCaser)
        .build()
}

// ─── Store ─────────────────────────────────────────────

/// Full-text store on embedded tantivy indexes, one per corpus.
///
/// Original text is stored for display and analyzed through
/// [`normalize_arabic`]; query words go through the same analyzer, so both
/// sides match token for token.
pub struct TantivyStore {
    indexes: PerType<Arc<CorpusIndex>>,
}

struct CorpusIndex {
    index: Index,
    reader: IndexReader,
    f_key: Field,
    f_scope: Field,
    f_text: Field,
    f_payload: Field,
}

fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("key", STRING | STORED);
    schema_builder.add_text_field("scope", STRING);
    let text_options = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(ARABIC_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    schema_builder.add_text_field("text", text_options);
    schema_builder.add_text_field("payload", STORED);
    schema_builder.build()
}

impl CorpusIndex {
    fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).context("Failed to open existing tantivy index")?
        } else {
            Index::create_in_dir(dir, build_schema()).context("Failed to create tantivy index")?
        };
        Self::from_index(index)
    }

    fn in_ram() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        index
            .tokenizers()
            .register(ARABIC_TOKENIZER, arabic_analyzer());
        let schema = index.schema();
        let field = |name: &str| {
            schema
                .get_field(name)
                .with_context(|| format!("Index schema is missing field '{name}'"))
        };
        let f_key = field("key")?;
        let f_scope = field("scope")?;
        let f_text = field("text")?;
        let f_payload = field("payload")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        Ok(Self {
            index,
            reader,
            f_key,
            f_scope,
            f_text,
            f_payload,
        })
    }

    fn writer(&self) -> Result<IndexWriter> {
        self.index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")
    }

    fn commit(&self, mut writer: IndexWriter) -> Result<()> {
        writer.commit().context("Failed to commit index")?;
        self.reader.reload().context("Failed to reload reader")?;
        Ok(())
    }

    fn add_documents(&self, docs: &[&CorpusDoc]) -> Result<()> {
        let writer = self.writer()?;
        for d in docs {
            let key = d.key().to_string();
            writer.delete_term(Term::from_field_text(self.f_key, &key));
            let payload =
                serde_json::to_string(d).context("Failed to serialize document payload")?;
            writer.add_document(doc!(
                self.f_key => key,
                self.f_scope => scope_of(d),
                self.f_text => d.text().to_string(),
                self.f_payload => payload,
            ))?;
        }
        self.commit(writer)
    }

    fn clear(&self) -> Result<()> {
        let writer = self.writer()?;
        writer
            .delete_all_documents()
            .context("Failed to delete documents")?;
        self.commit(writer)
    }

    /// Run `text` through the indexed field's analyzer.
    fn analyze(&self, text: &str) -> Result<Vec<Term>> {
        let mut analyzer = self
            .index
            .tokenizer_for_field(self.f_text)
            .context("No tokenizer for text field")?;
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        while stream.advance() {
            terms.push(Term::from_field_text(self.f_text, &stream.token().text));
        }
        Ok(terms)
    }

    /// Scope restriction that contributes nothing to the score.
    fn scope_clause(&self, corpus: Corpus, scope: &ScopeFilter) -> Option<Box<dyn Query>> {
        let value = match corpus {
            Corpus::Pages => scope.book_id.clone(),
            Corpus::Ayahs => scope.surah.map(|s| s.to_string()),
            Corpus::Hadiths => scope.collection.clone(),
        }?;
        let term = TermQuery::new(
            Term::from_field_text(self.f_scope, &value),
            IndexRecordOption::Basic,
        );
        Some(Box::new(ConstScoreQuery::new(Box::new(term), 0.0)))
    }

    fn build_query(
        &self,
        corpus: Corpus,
        fts: &FtsQuery,
        scope: &ScopeFilter,
    ) -> Result<Option<Box<dyn Query>>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        for phrase in &fts.phrases {
            let terms = self.analyze(&phrase.join(" "))?;
            match terms.len() {
                0 => {}
                1 => clauses.push((
                    Occur::Must,
                    Box::new(TermQuery::new(
                        terms[0].clone(),
                        IndexRecordOption::WithFreqs,
                    )),
                )),
                _ => clauses.push((Occur::Must, Box::new(PhraseQuery::new(terms)))),
            }
        }

        let mut any_of: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for word in &fts.terms {
            for term in self.analyze(word)? {
                any_of.push((
                    Occur::Should,
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)),
                ));
            }
        }
        if !any_of.is_empty() {
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(any_of))));
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        if let Some(filter) = self.scope_clause(corpus, scope) {
            clauses.push((Occur::Must, filter));
        }
        Ok(Some(Box::new(BooleanQuery::new(clauses))))
    }

    fn build_fuzzy_query(
        &self,
        corpus: Corpus,
        words: &[String],
        scope: &ScopeFilter,
    ) -> Result<Option<Box<dyn Query>>> {
        let mut any_of: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for word in words {
            for term in self.analyze(word)? {
                any_of.push((Occur::Should, Box::new(FuzzyTermQuery::new(term, 1, true))));
            }
        }
        if any_of.is_empty() {
            return Ok(None);
        }
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(
            Occur::Must,
            Box::new(BooleanQuery::new(any_of)) as Box<dyn Query>,
        )];
        if let Some(filter) = self.scope_clause(corpus, scope) {
            clauses.push((Occur::Must, filter));
        }
        Ok(Some(Box::new(BooleanQuery::new(clauses))))
    }

    fn execute(&self, query: &dyn Query, limit: usize) -> Result<Vec<TextHit>> {
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(query, &TopDocs::with_limit(limit.max(1)))
            .context("Search failed")?;

        let mut snippets = SnippetGenerator::create(&searcher, query, self.f_text)
            .context("Failed to create snippet generator")?;
        snippets.set_max_num_chars(SNIPPET_MAX_CHARS);

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let stored: TantivyDocument = searcher
                .doc(address)
                .context("Failed to retrieve document")?;
            let Some(doc) = self.decode(&stored) else {
                continue;
            };
            let snippet = snippets.snippet_from_doc(&stored);
            let excerpt = if snippet.fragment().is_empty() {
                None
            } else {
                Some(snippet.to_html())
            };
            hits.push(TextHit {
                doc,
                native_rank: score,
                excerpt,
            });
        }
        Ok(hits)
    }

    fn decode(&self, stored: &TantivyDocument) -> Option<CorpusDoc> {
        let raw = stored.get_first(self.f_payload).and_then(|v| v.as_str())?;
        match serde_json::from_str(raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!("Skipping document with unreadable payload: {e}");
                None
            }
        }
    }

    fn count(&self, query: &dyn Query) -> Result<u64> {
        let searcher = self.reader.searcher();
        let n = searcher.search(query, &Count).context("Count failed")?;
        Ok(n as u64)
    }

    fn document_frequency(&self, word: &str) -> Result<u64> {
        let searcher = self.reader.searcher();
        // A word can analyze to several tokens; report the rarest one.
        let mut rarest: Option<u64> = None;
        for term in self.analyze(word)? {
            let df = searcher.doc_freq(&term).context("Document frequency failed")?;
            rarest = Some(rarest.map_or(df, |r| r.min(df)));
        }
        Ok(rarest.unwrap_or(0))
    }

    fn stats(&self) -> Result<CorpusStats> {
        let searcher = self.reader.searcher();
        let total_documents = searcher.num_docs();
        let mut total_tokens = 0u64;
        for segment in searcher.segment_readers() {
            let inverted = segment
                .inverted_index(self.f_text)
                .context("Failed to open inverted index")?;
            total_tokens += inverted.total_num_tokens();
        }
        let avg_document_length = if total_documents == 0 {
            0.0
        } else {
            total_tokens as f32 / total_documents as f32
        };
        Ok(CorpusStats {
            total_documents,
            avg_document_length,
        })
    }

    fn fetch_one(&self, key: &DocKey) -> Result<Option<CorpusDoc>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.f_key, &key.to_string()),
            IndexRecordOption::Basic,
        );
        let top = searcher
            .search(&query, &TopDocs::with_limit(1))
            .context("Key lookup failed")?;
        match top.first() {
            Some((_, address)) => {
                let stored: TantivyDocument = searcher.doc(*address)?;
                Ok(self.decode(&stored))
            }
            None => Ok(None),
        }
    }
}

fn scope_of(doc: &CorpusDoc) -> String {
    match doc {
        CorpusDoc::Page(p) => p.book_id.clone(),
        CorpusDoc::Ayah(a) => a.surah_number.to_string(),
        CorpusDoc::Hadith(h) => h.collection_slug.clone(),
    }
}

impl TantivyStore {
    /// Create or open the per-corpus indexes under `index_dir`.
    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        let open = |corpus: Corpus| -> Result<Arc<CorpusIndex>> {
            Ok(Arc::new(CorpusIndex::open_or_create(
                &index_dir.join(corpus.as_str()),
            )?))
        };
        Ok(Self {
            indexes: PerType {
                books: open(Corpus::Pages)?,
                ayahs: open(Corpus::Ayahs)?,
                hadiths: open(Corpus::Hadiths)?,
            },
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            indexes: PerType {
                books: Arc::new(CorpusIndex::in_ram()?),
                ayahs: Arc::new(CorpusIndex::in_ram()?),
                hadiths: Arc::new(CorpusIndex::in_ram()?),
            },
        })
    }

    /// Index (or replace, by identity) a batch of records.
    pub fn index_documents(&self, docs: &[CorpusDoc]) -> Result<usize> {
        for corpus in Corpus::ALL {
            let batch: Vec<&CorpusDoc> = docs.iter().filter(|d| d.corpus() == corpus).collect();
            if !batch.is_empty() {
                self.indexes.get(corpus).add_documents(&batch)?;
            }
        }
        Ok(docs.len())
    }

    /// Delete every record of one corpus.
    pub fn clear(&self, corpus: Corpus) -> Result<()> {
        self.indexes.get(corpus).clear()
    }

    fn index(&self, corpus: Corpus) -> Arc<CorpusIndex> {
        self.indexes.get(corpus).clone()
    }
}

#[async_trait]
impl DocumentStore for TantivyStore {
    async fn ranked_search(
        &self,
        corpus: Corpus,
        query: &FtsQuery,
        limit: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<TextHit>> {
        let idx = self.index(corpus);
        let query = query.clone();
        let scope = scope.clone();
        tokio::task::spawn_blocking(move || match idx.build_query(corpus, &query, &scope)? {
            Some(q) => idx.execute(q.as_ref(), limit),
            None => Ok(Vec::new()),
        })
        .await
        .context("Full-text search task failed")?
    }

    async fn fuzzy_search(
        &self,
        corpus: Corpus,
        terms: &[String],
        limit: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<TextHit>> {
        let idx = self.index(corpus);
        let terms = terms.to_vec();
        let scope = scope.clone();
        tokio::task::spawn_blocking(move || {
            match idx.build_fuzzy_query(corpus, &terms, &scope)? {
                Some(q) => idx.execute(q.as_ref(), limit),
                None => Ok(Vec::new()),
            }
        })
        .await
        .context("Fuzzy search task failed")?
    }

    async fn document_frequency(&self, corpus: Corpus, term: &str) -> Result<u64> {
        let idx = self.index(corpus);
        let term = term.to_string();
        tokio::task::spawn_blocking(move || idx.document_frequency(&term))
            .await
            .context("Document frequency task failed")?
    }

    async fn corpus_stats(&self, corpus: Corpus) -> Result<CorpusStats> {
        let idx = self.index(corpus);
        tokio::task::spawn_blocking(move || idx.stats())
            .await
            .context("Corpus stats task failed")?
    }

    async fn fetch(&self, keys: &[DocKey]) -> Result<Vec<CorpusDoc>> {
        let keys = keys.to_vec();
        let indexes = self.indexes.clone();
        tokio::task::spawn_blocking(move || {
            let mut docs = Vec::new();
            for key in &keys {
                if let Some(doc) = indexes.get(key.corpus()).fetch_one(key)? {
                    docs.push(doc);
                }
            }
            Ok(docs)
        })
        .await
        .context("Fetch task failed")?
    }
}

impl TantivyStore {
    /// Number of records currently indexed for `corpus`.
    pub fn document_count(&self, corpus: Corpus) -> Result<u64> {
        let idx = self.indexes.get(corpus);
        idx.count(&tantivy::query::AllQuery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ayah, BookPage, Hadith};
    use crate::search::query::parse_query;

    fn ayah(s: u32, a: u32, text: &str) -> CorpusDoc {
        CorpusDoc::Ayah(Ayah {
            surah_number: s,
            ayah_number: a,
            surah_name: None,
            text: text.to_string(),
            translation: None,
        })
    }

    fn page(book: &str, n: u32, text: &str) -> CorpusDoc {
        CorpusDoc::Page(BookPage {
            book_id: book.to_string(),
            page_number: n,
            book_title: None,
            author: None,
            text: text.to_string(),
        })
    }

    fn store() -> TantivyStore {
        let store = TantivyStore::in_memory().unwrap();
        store
            .index_documents(&[
                ayah(2, 255, "ٱللَّهُ لَآ إِلَٰهَ إِلَّا هُوَ ٱلْحَىُّ ٱلْقَيُّومُ"),
                ayah(112, 1, "قُلْ هُوَ ٱللَّهُ أَحَدٌ"),
                page("b1", 1, "باب الصلاة في المسجد"),
                page("b1", 2, "فضل الصلاة على وقتها"),
                page("b2", 9, "كتاب الزكاة ثم الصلاة"),
                CorpusDoc::Hadith(Hadith {
                    collection_slug: "bukhari".to_string(),
                    hadith_number: "1".to_string(),
                    collection_name: None,
                    text: "إِنَّمَا الأَعْمَالُ بِالنِّيَّاتِ".to_string(),
                    translation: None,
                }),
            ])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_diacritic_free_query_matches_vocalized_text() {
        let store = store();
        let fts = FtsQuery::from_parsed(&parse_query("الحى القيوم"));
        let hits = store
            .ranked_search(Corpus::Ayahs, &fts, 10, &ScopeFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.key(), DocKey::Ayah { surah: 2, ayah: 255 });
        assert!(hits[0].native_rank > 0.0);
    }

    #[tokio::test]
    async fn test_excerpt_keeps_original_diacritics() {
        let store = store();
        let fts = FtsQuery::from_parsed(&parse_query("القيوم"));
        let hits = store
            .ranked_search(Corpus::Ayahs, &fts, 10, &ScopeFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        let excerpt = hits[0].excerpt.clone().unwrap();
        assert!(excerpt.contains("<b>ٱلْقَيُّومُ</b>"), "{excerpt}");
        assert_eq!(hits[0].doc.text(), "ٱللَّهُ لَآ إِلَٰهَ إِلَّا هُوَ ٱلْحَىُّ ٱلْقَيُّومُ");
    }

    #[test]
    fn test_analyzer_normalizes_tokens() {
        let mut analyzer = arabic_analyzer();
        let mut stream = analyzer.token_stream("ٱلْقَيُّومُ  Ayat");
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        assert_eq!(tokens, vec!["القيوم", "ayat"]);
    }

    #[tokio::test]
    async fn test_phrase_requires_adjacency() {
        let store = store();
        let adjacent = FtsQuery::from_parsed(&parse_query("\"الاعمال بالنيات\""));
        let hits = store
            .ranked_search(Corpus::Hadiths, &adjacent, 10, &ScopeFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let reversed = FtsQuery::from_parsed(&parse_query("\"بالنيات الاعمال\""));
        let hits = store
            .ranked_search(Corpus::Hadiths, &reversed, 10, &ScopeFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_scope_filter_restricts_book() {
        let store = store();
        let fts = FtsQuery::from_parsed(&parse_query("الصلاة"));
        let all = store
            .ranked_search(Corpus::Pages, &fts, 10, &ScopeFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let scope = ScopeFilter {
            book_id: Some("b2".to_string()),
            ..Default::default()
        };
        let scoped = store
            .ranked_search(Corpus::Pages, &fts, 10, &scope)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert!(matches!(&scoped[0].doc, CorpusDoc::Page(p) if p.book_id == "b2"));
    }

    #[tokio::test]
    async fn test_fuzzy_search_tolerates_one_edit() {
        let store = store();
        // one substituted letter
        let hits = store
            .fuzzy_search(
                Corpus::Pages,
                &["المسجذ".to_string()],
                10,
                &ScopeFilter::default(),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_document_frequency_and_stats_are_per_corpus() {
        let store = store();
        assert_eq!(
            store.document_frequency(Corpus::Pages, "الصلاه").await.unwrap(),
            3
        );
        assert_eq!(
            store.document_frequency(Corpus::Ayahs, "الصلاه").await.unwrap(),
            0
        );
        let stats = store.corpus_stats(Corpus::Pages).await.unwrap();
        assert_eq!(stats.total_documents, 3);
        assert!((stats.avg_document_length - 4.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_fetch_by_key_and_reindex_replaces() {
        let store = store();
        store
            .index_documents(&[ayah(2, 255, "updated text")])
            .unwrap();
        assert_eq!(store.document_count(Corpus::Ayahs).unwrap(), 2);

        let docs = store
            .fetch(&[
                DocKey::Ayah { surah: 2, ayah: 255 },
                DocKey::Ayah { surah: 9, ayah: 999 },
            ])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text(), "updated text");
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let store = store();
        let hits = store
            .ranked_search(
                Corpus::Pages,
                &FtsQuery::default(),
                10,
                &ScopeFilter::default(),
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
