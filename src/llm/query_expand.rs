use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::llm::chat::{extract_json_array, sanitize_for_prompt, ChatModel, MAX_PROMPT_QUERY_CHARS};
use crate::models::ExpandedQuery;
use crate::search::normalize::normalize_arabic;

const EXPANSION_TIMEOUT: Duration = Duration::from_secs(15);
const ORIGINAL_REASON: &str = "original query";
const DEFAULT_REASON: &str = "alternate phrasing";

#[derive(Debug, Clone)]
pub struct ExpansionParams {
    /// Fusion weight of each generated alternate
    pub weight: f32,
    pub max_expansions: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for ExpansionParams {
    fn default() -> Self {
        Self {
            weight: 0.7,
            max_expansions: 4,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cache_capacity: 1000,
        }
    }
}

/// The model may answer with plain strings or with objects naming the
/// strategy used.
#[derive(Deserialize)]
#[serde(untagged)]
enum Alternate {
    Plain(String),
    Tagged {
        query: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// LLM query expansion with a cache keyed by the normalized query.
pub struct QueryExpander {
    chat: Arc<dyn ChatModel>,
    model: String,
    params: ExpansionParams,
    cache: TtlCache<String, Vec<ExpandedQuery>>,
}

fn cache_key(query: &str) -> String {
    normalize_arabic(query).to_lowercase()
}

fn original(query: &str) -> ExpandedQuery {
    ExpandedQuery {
        query: query.to_string(),
        weight: 1.0,
        reason: ORIGINAL_REASON.to_string(),
    }
}

impl QueryExpander {
    pub fn new(chat: Arc<dyn ChatModel>, model: String, params: ExpansionParams) -> Self {
        Self::with_clock(chat, model, params, Arc::new(SystemClock))
    }

    pub fn with_clock(
        chat: Arc<dyn ChatModel>,
        model: String,
        params: ExpansionParams,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = TtlCache::with_clock(params.cache_ttl, params.cache_capacity, clock);
        Self {
            chat,
            model,
            params,
            cache,
        }
    }

    /// The original query at weight 1.0 followed by up to
    /// `max_expansions` alternates. Never fails: any error yields just the
    /// original.
    pub async fn expand(&self, query: &str) -> Vec<ExpandedQuery> {
        let key = cache_key(query);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(query, "expansion cache hit");
            return hit;
        }

        if !self.chat.is_configured() {
            tracing::debug!("LLM not configured, skipping query expansion");
            return vec![original(query)];
        }

        let alternates = match tokio::time::timeout(EXPANSION_TIMEOUT, self.generate(query)).await {
            Ok(Ok(alternates)) => alternates,
            Ok(Err(e)) => {
                tracing::warn!("Query expansion failed: {e:#}");
                return vec![original(query)];
            }
            Err(_) => {
                tracing::warn!("Query expansion timed out after {EXPANSION_TIMEOUT:?}");
                return vec![original(query)];
            }
        };

        let mut expanded = vec![original(query)];
        expanded.extend(alternates);
        self.cache.insert(key, expanded.clone());
        expanded
    }

    async fn generate(&self, query: &str) -> Result<Vec<ExpandedQuery>> {
        let prompt = build_prompt(query, self.params.max_expansions);
        let response = self.chat.complete(&self.model, &prompt, 0.3).await?;
        let parsed = parse_expanded_queries(&response)?;
        Ok(select_alternates(
            query,
            parsed,
            self.params.max_expansions,
            self.params.weight,
        ))
    }
}

fn build_prompt(query: &str, max: usize) -> String {
    let query = sanitize_for_prompt(query, MAX_PROMPT_QUERY_CHARS);
    format!(
        "You expand search queries over classical Islamic texts (Quran, hadith and \
         Arabic books of scholarship). Generate up to {max} alternative queries that \
         would find relevant passages the original might miss. Use these strategies:\n\
         - answer: if the query is a question, rewrite it as the words a passage \
         answering it would contain\n\
         - cross-lingual: bridge between Arabic and English, using the classical \
         Arabic terminology for an English query and vice versa\n\
         - topical: related topic names, synonyms and words sharing the Arabic root\n\n\
         Original query: \"{query}\"\n\n\
         Respond with ONLY a JSON array. Each element is either a string or an \
         object {{\"query\": \"...\", \"reason\": \"answer|cross-lingual|topical\"}}. \
         No explanation."
    )
}

fn parse_expanded_queries(content: &str) -> Result<Vec<(String, Option<String>)>> {
    let json_str = extract_json_array(content).context("No JSON array in expansion response")?;
    let items: Vec<Alternate> =
        serde_json::from_str(json_str).context("Failed to parse expanded queries")?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            Alternate::Plain(q) => (q, None),
            Alternate::Tagged { query, reason } => (query, reason),
        })
        .collect())
}

/// Drop blanks, the original and duplicates (compared normalized), keep
/// the first `max`.
fn select_alternates(
    query: &str,
    candidates: Vec<(String, Option<String>)>,
    max: usize,
    weight: f32,
) -> Vec<ExpandedQuery> {
    let mut seen = vec![cache_key(query)];
    let mut out = Vec::new();
    for (text, reason) in candidates {
        let text = text.trim().to_string();
        let key = cache_key(&text);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(ExpandedQuery {
            query: text,
            weight,
            reason: reason.unwrap_or_else(|| DEFAULT_REASON.to_string()),
        });
        if out.len() >= max {
            break;
        }
    }
    out
}
