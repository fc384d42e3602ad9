use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{DocKey, RankedResult, ScoreCard};

/// Fused scores closer than this are ordered by RRF instead.
const TIE_TOLERANCE: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    /// Maximum bonus a keyword confirmation adds to a semantic score.
    pub confirmation_weight: f32,
    /// `k` in `bm25 / (bm25 + k)`.
    pub bm25_norm_k: f32,
    /// RRF constant.
    pub rrf_k: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            confirmation_weight: 0.15,
            bm25_norm_k: 5.0,
            rrf_k: 60.0,
        }
    }
}

/// Squash a raw BM25 score into [0, 1).
pub fn normalize_bm25(score: f32, k: f32) -> f32 {
    if score <= 0.0 {
        return 0.0;
    }
    score / (score + k)
}

fn rrf_term(rank: Option<usize>, k: f32) -> f32 {
    rank.map_or(0.0, |r| 1.0 / (k + r as f32))
}

/// Overlay the non-empty score fields of `from` onto `into`.
fn absorb(into: &mut ScoreCard, from: &ScoreCard) {
    into.semantic_score = into.semantic_score.or(from.semantic_score);
    into.semantic_rank = into.semantic_rank.or(from.semantic_rank);
    into.keyword_score = into.keyword_score.or(from.keyword_score);
    into.keyword_rank = into.keyword_rank.or(from.keyword_rank);
    into.ts_rank = into.ts_rank.or(from.ts_rank);
    into.bm25_score = into.bm25_score.or(from.bm25_score);
}

/// Bucketed comparison keeps the order total while treating fused
/// scores within [`TIE_TOLERANCE`] as equal.
fn fused_bucket(score: f32) -> i64 {
    (score / TIE_TOLERANCE).round() as i64
}

fn compare_fused(a: &RankedResult, b: &RankedResult) -> Ordering {
    let fa = a.scores.fused_score.unwrap_or(0.0);
    let fb = b.scores.fused_score.unwrap_or(0.0);
    fused_bucket(fb)
        .cmp(&fused_bucket(fa))
        .then_with(|| {
            let ra = a.scores.rrf_score.unwrap_or(0.0);
            let rb = b.scores.rrf_score.unwrap_or(0.0);
            rb.partial_cmp(&ra).unwrap_or(Ordering::Equal)
        })
        .then_with(|| fb.partial_cmp(&fa).unwrap_or(Ordering::Equal))
        .then_with(|| a.key().cmp(&b.key()))
}

/// Single-query fusion of semantic and keyword lists for one corpus.
///
/// - both methods: `semantic + w · bm25 / (bm25 + k)`
/// - semantic only: `semantic`
/// - keyword only: the keyword engine's combined score
///
/// Results are ordered by fused score, with RRF over whichever ranks
/// exist breaking near-ties.
pub fn merge_with_rrf(
    semantic: Vec<RankedResult>,
    keyword: Vec<RankedResult>,
    params: FusionParams,
) -> Vec<RankedResult> {
    let mut order: Vec<DocKey> = Vec::new();
    let mut merged: HashMap<DocKey, RankedResult> = HashMap::new();

    for hit in semantic.into_iter().chain(keyword) {
        let key = hit.key();
        match merged.get_mut(&key) {
            Some(existing) => {
                absorb(&mut existing.scores, &hit.scores);
                if existing.excerpt.is_none() {
                    existing.excerpt = hit.excerpt;
                }
            }
            None => {
                order.push(key.clone());
                merged.insert(key, hit);
            }
        }
    }

    let mut results: Vec<RankedResult> = order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .map(|mut r| {
            let s = &r.scores;
            let fused = match (s.semantic_score, s.keyword_score) {
                (Some(sem), Some(_)) => {
                    let bm25 = s.bm25_score.unwrap_or(0.0);
                    sem + params.confirmation_weight * normalize_bm25(bm25, params.bm25_norm_k)
                }
                (Some(sem), None) => sem,
                (None, Some(kw)) => kw,
                (None, None) => 0.0,
            };
            let rrf = rrf_term(s.semantic_rank, params.rrf_k) + rrf_term(s.keyword_rank, params.rrf_k);
            r.scores.fused_score = Some(fused);
            r.scores.rrf_score = Some(rrf);
            r.score = fused;
            r
        })
        .collect();

    results.sort_by(compare_fused);
    results
}

/// One query variant's fused list and its provenance weight.
pub struct QueryResults {
    pub results: Vec<RankedResult>,
    /// 1.0 for the original query, lower for generated alternates
    pub weight: f32,
}

/// Weighted multi-query fusion.
///
/// Each result at 0-indexed position `rank` in a list of weight `w`
/// contributes `w / (k + rank + 1)`. Contributions for one identity sum
/// across lists, and the best sub-scores seen are kept.
pub fn multi_query_rrf_fusion(
    query_results: &[QueryResults],
    params: FusionParams,
    limit: usize,
) -> Vec<RankedResult> {
    let mut order: Vec<DocKey> = Vec::new();
    let mut merged: HashMap<DocKey, (f32, RankedResult)> = HashMap::new();

    for qr in query_results {
        for (rank, hit) in qr.results.iter().enumerate() {
            let contribution = qr.weight / (params.rrf_k + rank as f32 + 1.0);
            let key = hit.key();
            match merged.get_mut(&key) {
                Some((acc, existing)) => {
                    *acc += contribution;
                    keep_best(&mut existing.scores, &hit.scores);
                    if existing.excerpt.is_none() {
                        existing.excerpt = hit.excerpt.clone();
                    }
                }
                None => {
                    order.push(key.clone());
                    merged.insert(key, (contribution, hit.clone()));
                }
            }
        }
    }

    let mut results: Vec<RankedResult> = order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .map(|(acc, mut r)| {
            r.scores.rrf_score = Some(acc);
            r.score = acc;
            r
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key().cmp(&b.key()))
    });
    results.truncate(limit);
    results
}

fn max_opt(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

fn min_opt(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

fn keep_best(into: &mut ScoreCard, from: &ScoreCard) {
    into.semantic_score = max_opt(into.semantic_score, from.semantic_score);
    into.keyword_score = max_opt(into.keyword_score, from.keyword_score);
    into.ts_rank = max_opt(into.ts_rank, from.ts_rank);
    into.bm25_score = max_opt(into.bm25_score, from.bm25_score);
    into.fused_score = max_opt(into.fused_score, from.fused_score);
    into.semantic_rank = min_opt(into.semantic_rank, from.semantic_rank);
    into.keyword_rank = min_opt(into.keyword_rank, from.keyword_rank);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookPage, CorpusDoc, MatchType};

    fn page(n: u32) -> CorpusDoc {
        CorpusDoc::Page(BookPage {
            book_id: "b".to_string(),
            page_number: n,
            book_title: None,
            author: None,
            text: format!("page {n}"),
        })
    }

    fn sem(n: u32, rank: usize, score: f32) -> RankedResult {
        let mut r = RankedResult::new(page(n));
        r.scores.semantic_score = Some(score);
        r.scores.semantic_rank = Some(rank);
        r.score = score;
        r
    }

    fn kw(n: u32, rank: usize, score: f32, bm25: f32) -> RankedResult {
        let mut r = RankedResult::new(page(n));
        r.scores.keyword_score = Some(score);
        r.scores.keyword_rank = Some(rank);
        r.scores.bm25_score = Some(bm25);
        r.score = score;
        r
    }

    fn pages(results: &[RankedResult]) -> Vec<u32> {
        results
            .iter()
            .map(|r| match &r.doc {
                CorpusDoc::Page(p) => p.page_number,
                _ => 0,
            })
            .collect()
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge_with_rrf(vec![], vec![], FusionParams::default()).is_empty());
        assert!(multi_query_rrf_fusion(&[], FusionParams::default(), 10).is_empty());
    }

    #[test]
    fn test_normalize_bm25_bounded() {
        assert_eq!(normalize_bm25(0.0, 5.0), 0.0);
        assert!((normalize_bm25(5.0, 5.0) - 0.5).abs() < 1e-6);
        assert!(normalize_bm25(1e6, 5.0) < 1.0);
    }

    #[test]
    fn test_confirmation_bonus_formula() {
        let results = merge_with_rrf(
            vec![sem(1, 1, 0.6)],
            vec![kw(1, 1, 0.9, 5.0)],
            FusionParams::default(),
        );
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert!((r.scores.fused_score.unwrap() - (0.6 + 0.15 * 0.5)).abs() < 1e-6);
        assert!((r.scores.rrf_score.unwrap() - 2.0 / 61.0).abs() < 1e-6);
        assert_eq!(r.classify_match(), MatchType::Both);
    }

    #[test]
    fn test_dual_signal_never_below_semantic_only() {
        for bm25 in [0.0, 0.1, 3.0, 40.0] {
            let results = merge_with_rrf(
                vec![sem(1, 1, 0.5), sem(2, 2, 0.5)],
                vec![kw(1, 1, 0.2, bm25)],
                FusionParams::default(),
            );
            let both = results.iter().find(|r| r.classify_match() == MatchType::Both).unwrap();
            let single = results
                .iter()
                .find(|r| r.classify_match() == MatchType::Semantic)
                .unwrap();
            assert!(both.scores.fused_score >= single.scores.fused_score);
            assert_eq!(pages(&results)[0], 1);
        }
    }

    #[test]
    fn test_single_method_scores_pass_through() {
        let results = merge_with_rrf(
            vec![sem(1, 1, 0.42)],
            vec![kw(2, 1, 0.77, 9.0)],
            FusionParams::default(),
        );
        assert_eq!(pages(&results), vec![2, 1]);
        assert_eq!(results[0].scores.fused_score, Some(0.77));
        assert_eq!(results[0].classify_match(), MatchType::Keyword);
        assert_eq!(results[1].scores.fused_score, Some(0.42));
        assert!(results[1].scores.keyword_rank.is_none());
    }

    #[test]
    fn test_rrf_breaks_near_ties() {
        // equal fused scores; page 2 also has a keyword rank
        let results = merge_with_rrf(
            vec![sem(1, 1, 0.5), sem(2, 2, 0.5)],
            vec![kw(2, 1, 0.1, 0.0)],
            FusionParams::default(),
        );
        assert_eq!(pages(&results), vec![2, 1]);
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let semantic = vec![sem(1, 1, 0.8), sem(2, 2, 0.7), sem(3, 3, 0.5)];
        let keyword = vec![kw(3, 1, 0.9, 8.0), kw(4, 2, 0.6, 4.0), kw(1, 3, 0.3, 1.0)];

        let forward = merge_with_rrf(semantic.clone(), keyword.clone(), FusionParams::default());
        let backward = merge_with_rrf(keyword, semantic, FusionParams::default());
        assert_eq!(pages(&forward), pages(&backward));
        for (a, b) in forward.iter().zip(&backward) {
            assert_eq!(a.scores.fused_score, b.scores.fused_score);
        }
    }

    #[test]
    fn test_custom_confirmation_weight() {
        let params = FusionParams {
            confirmation_weight: 0.0,
            ..FusionParams::default()
        };
        let results = merge_with_rrf(vec![sem(1, 1, 0.6)], vec![kw(1, 1, 0.9, 50.0)], params);
        assert_eq!(results[0].scores.fused_score, Some(0.6));
    }

    #[test]
    fn test_multi_query_additivity() {
        let a = QueryResults {
            results: vec![sem(1, 1, 0.9), sem(2, 2, 0.8)],
            weight: 1.0,
        };
        let b = QueryResults {
            results: vec![sem(1, 1, 0.7), sem(3, 2, 0.6)],
            weight: 1.0,
        };
        let c = QueryResults {
            results: vec![sem(4, 1, 0.95)],
            weight: 1.0,
        };
        let results = multi_query_rrf_fusion(&[a, b, c], FusionParams::default(), 10);
        assert_eq!(pages(&results)[0], 1);
        let top = results[0].score;
        let single = results.iter().find(|r| r.key() == page(4).key()).unwrap();
        assert!(top > single.score);
        assert!((top - 2.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_multi_query_weights() {
        let original = QueryResults {
            results: vec![sem(1, 1, 0.5)],
            weight: 1.0,
        };
        let expanded = QueryResults {
            results: vec![sem(2, 1, 0.9)],
            weight: 0.7,
        };
        let results = multi_query_rrf_fusion(&[expanded, original], FusionParams::default(), 10);
        assert_eq!(pages(&results), vec![1, 2]);
        assert!((results[1].score - 0.7 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_multi_query_keeps_best_sub_scores() {
        let mut first = sem(1, 3, 0.4);
        first.scores.bm25_score = Some(2.0);
        let mut second = sem(1, 1, 0.8);
        second.scores.bm25_score = Some(1.0);
        let results = multi_query_rrf_fusion(
            &[
                QueryResults {
                    results: vec![first],
                    weight: 1.0,
                },
                QueryResults {
                    results: vec![second],
                    weight: 0.7,
                },
            ],
            FusionParams::default(),
            10,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].scores.semantic_score, Some(0.8));
        assert_eq!(results[0].scores.bm25_score, Some(2.0));
        assert_eq!(results[0].scores.semantic_rank, Some(1));
    }

    #[test]
    fn test_multi_query_limit_respected() {
        let qr = QueryResults {
            results: (1..=50).map(|n| sem(n, n as usize, 0.5)).collect(),
            weight: 1.0,
        };
        assert_eq!(multi_query_rrf_fusion(&[qr], FusionParams::default(), 5).len(), 5);
    }
}
