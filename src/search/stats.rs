use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::models::Corpus;
use crate::search::store::{CorpusStats, DocumentStore};

pub const DEFAULT_STATS_TTL: Duration = Duration::from_secs(60 * 60);

/// Time-boxed cache of per-corpus document count and average length.
/// Stale values are fine: BM25 only needs approximate statistics.
pub struct CorpusStatsCache {
    cache: TtlCache<Corpus, CorpusStats>,
}

impl CorpusStatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::with_clock(ttl, Corpus::ALL.len(), clock),
        }
    }

    /// Cached stats, refreshed from the store once the TTL has passed.
    pub async fn get(&self, store: &dyn DocumentStore, corpus: Corpus) -> Result<CorpusStats> {
        if let Some(stats) = self.cache.get(&corpus) {
            return Ok(stats);
        }
        let stats = store.corpus_stats(corpus).await?;
        tracing::debug!(
            corpus = %corpus,
            total = stats.total_documents,
            avg_len = stats.avg_document_length,
            "refreshed corpus stats"
        );
        self.cache.insert(corpus, stats);
        Ok(stats)
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

impl Default for CorpusStatsCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_TTL)
    }
}
