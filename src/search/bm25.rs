//! Okapi BM25 scoring over full-text candidates.
//!
//! The full-text store ranks by its own relevance function, which has no
//! document-frequency discrimination. These scores are computed here from
//! corpus statistics and per-term document frequencies.

use std::collections::HashMap;

use crate::search::normalize::{is_word_char, normalize_arabic};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// `ln((N - df + 0.5) / (df + 0.5) + 1)`, never negative.
pub fn idf(total_documents: u64, document_frequency: u64) -> f32 {
    let n = total_documents as f64;
    let df = document_frequency as f64;
    let value = ((n - df).max(0.0) + 0.5) / (df + 0.5) + 1.0;
    (value.ln() as f32).max(0.0)
}

/// Contribution of one term to a document's score.
pub fn term_score(tf: f32, idf: f32, doc_len: f32, avg_doc_len: f32, params: Bm25Params) -> f32 {
    if tf <= 0.0 || idf <= 0.0 {
        return 0.0;
    }
    let avg = if avg_doc_len > 0.0 {
        avg_doc_len
    } else {
        doc_len.max(1.0)
    };
    let norm = params.k1 * (1.0 - params.b + params.b * doc_len / avg);
    idf * (tf * (params.k1 + 1.0)) / (tf + norm)
}

/// Split text into the same word units the query parser produces, lowercased.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_arabic(text)
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| is_word_char(*c))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// BM25 score of a tokenized document against terms with known IDF.
pub fn score_document(
    tokens: &[String],
    idfs: &HashMap<String, f32>,
    avg_doc_len: f32,
    params: Bm25Params,
) -> f32 {
    if tokens.is_empty() || idfs.is_empty() {
        return 0.0;
    }
    let mut tf: HashMap<&str, u32> = HashMap::new();
    for t in tokens {
        if idfs.contains_key(t.as_str()) {
            *tf.entry(t.as_str()).or_insert(0) += 1;
        }
    }
    let doc_len = tokens.len() as f32;
    idfs.iter()
        .map(|(term, idf)| {
            let freq = tf.get(term.as_str()).copied().unwrap_or(0) as f32;
            term_score(freq, *idf, doc_len, avg_doc_len, params)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idf_rare_terms_score_higher() {
        assert!(idf(1000, 1) > idf(1000, 100));
        assert!(idf(1000, 100) > idf(1000, 900));
    }

    #[test]
    fn test_idf_never_negative() {
        assert!(idf(10, 10) >= 0.0);
        // stale stats can report df > N
        assert!(idf(10, 50) >= 0.0);
        assert!(idf(0, 0) >= 0.0);
    }

    #[test]
    fn test_idf_known_value() {
        // ln((100 - 10 + 0.5) / 10.5 + 1)
        let expected = ((90.5f64 / 10.5) + 1.0).ln() as f32;
        assert!((idf(100, 10) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_term_score_monotonic_and_saturating() {
        let p = Bm25Params::default();
        let mut prev = 0.0;
        for tf in 1..50 {
            let s = term_score(tf as f32, 2.0, 100.0, 100.0, p);
            assert!(s >= prev, "score decreased at tf={tf}");
            prev = s;
        }
        // bounded by idf * (k1 + 1)
        assert!(prev < 2.0 * (p.k1 + 1.0));
    }

    #[test]
    fn test_longer_documents_score_lower() {
        let p = Bm25Params::default();
        let short = term_score(2.0, 1.5, 50.0, 100.0, p);
        let long = term_score(2.0, 1.5, 300.0, 100.0, p);
        assert!(short > long);
    }

    #[test]
    fn test_zero_average_length_does_not_divide_by_zero() {
        let s = term_score(1.0, 1.0, 10.0, 0.0, Bm25Params::default());
        assert!(s.is_finite() && s > 0.0);
    }

    #[test]
    fn test_tokenize_normalizes_and_lowercases() {
        assert_eq!(
            tokenize("Prayer, الصَّلَاةُ! in MASJID"),
            vec!["prayer", "الصلاه", "in", "masjid"]
        );
    }

    #[test]
    fn test_score_document_counts_term_frequency() {
        let p = Bm25Params::default();
        let idfs: HashMap<String, f32> = [("صبر".to_string(), 1.0)].into_iter().collect();
        let once = tokenize("صبر جميل والله المستعان");
        let twice = tokenize("صبر جميل صبر المستعان");
        assert!(score_document(&twice, &idfs, 4.0, p) > score_document(&once, &idfs, 4.0, p));
        assert_eq!(score_document(&tokenize("لا شيء"), &idfs, 4.0, p), 0.0);
    }
}
