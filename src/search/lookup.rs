//! Famous-source shortcut: well-known verse and hadith names resolve to
//! exact coordinates and are fetched directly.

use std::collections::HashSet;

use anyhow::Result;

use crate::models::{DocKey, RankedResult};
use crate::search::bm25::tokenize;
use crate::search::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTarget {
    /// Inclusive ayah range within one surah.
    Ayahs { surah: u32, start: u32, end: u32 },
    Hadith {
        collection: &'static str,
        number: &'static str,
    },
}

impl LookupTarget {
    pub fn keys(&self) -> Vec<DocKey> {
        match *self {
            LookupTarget::Ayahs { surah, start, end } => (start..=end)
                .map(|ayah| DocKey::Ayah { surah, ayah })
                .collect(),
            LookupTarget::Hadith { collection, number } => vec![DocKey::Hadith {
                collection: collection.to_string(),
                number: number.to_string(),
            }],
        }
    }
}

struct FamousSource {
    /// Distinctive names, matched anywhere in the query.
    names: &'static [&'static str],
    /// Generic phrases that only count when they are the whole query.
    exact_names: &'static [&'static str],
    target: LookupTarget,
}

const FAMOUS_SOURCES: &[FamousSource] = &[
    FamousSource {
        names: &[
            "آية الكرسي",
            "ayat al-kursi",
            "ayat al kursi",
            "ayatul kursi",
            "ayat ul kursi",
            "throne verse",
            "verse of the throne",
        ],
        exact_names: &[],
        target: LookupTarget::Ayahs {
            surah: 2,
            start: 255,
            end: 255,
        },
    },
    FamousSource {
        names: &[
            "سورة الفاتحة",
            "al-fatiha",
            "al fatiha",
            "surah al-fatiha",
            "surat al-fatiha",
        ],
        exact_names: &["الفاتحة", "the opening"],
        target: LookupTarget::Ayahs {
            surah: 1,
            start: 1,
            end: 7,
        },
    },
    FamousSource {
        names: &["آية النور", "ayat an-nur", "ayat al-nur"],
        exact_names: &["light verse", "verse of light"],
        target: LookupTarget::Ayahs {
            surah: 24,
            start: 35,
            end: 35,
        },
    },
    FamousSource {
        names: &["آية الدين", "ayat al-dayn"],
        exact_names: &["verse of debt", "debt verse"],
        target: LookupTarget::Ayahs {
            surah: 2,
            start: 282,
            end: 282,
        },
    },
    FamousSource {
        names: &[
            "خواتيم سورة البقرة",
            "خواتيم البقرة",
            "آمن الرسول",
            "last two verses of al-baqarah",
            "end of surah al-baqarah",
        ],
        exact_names: &[],
        target: LookupTarget::Ayahs {
            surah: 2,
            start: 285,
            end: 286,
        },
    },
    FamousSource {
        names: &["سورة الإخلاص", "al-ikhlas", "al ikhlas", "surah al-ikhlas", "surat al-ikhlas"],
        exact_names: &[],
        target: LookupTarget::Ayahs {
            surah: 112,
            start: 1,
            end: 4,
        },
    },
    FamousSource {
        names: &[
            "إنما الأعمال بالنيات",
            "حديث النية",
            "حديث إنما الأعمال بالنيات",
            "hadith of intentions",
            "hadith of intention",
            "actions are by intentions",
            "actions are judged by intentions",
        ],
        exact_names: &[],
        target: LookupTarget::Hadith {
            collection: "bukhari",
            number: "1",
        },
    },
    FamousSource {
        names: &["حديث جبريل", "hadith jibril", "hadith of jibril", "hadith of gabriel"],
        exact_names: &[],
        target: LookupTarget::Hadith {
            collection: "muslim",
            number: "8",
        },
    },
    FamousSource {
        names: &["الدين النصيحة", "religion is sincere advice", "religion is sincerity"],
        exact_names: &[],
        target: LookupTarget::Hadith {
            collection: "muslim",
            number: "55",
        },
    },
    FamousSource {
        names: &["لا ضرر ولا ضرار", "no harm no reciprocating harm"],
        exact_names: &[],
        target: LookupTarget::Hadith {
            collection: "ibnmajah",
            number: "2340",
        },
    },
];

fn canonical(text: &str) -> String {
    tokenize(text).join(" ")
}

/// The famous source named by `query`, if any, compared after the same
/// normalization used for search. A distinctive name matches when the
/// query's words contain it as a contiguous run; a generic phrase must be
/// the entire query.
pub fn match_famous_source(query: &str) -> Option<LookupTarget> {
    let query = canonical(query);
    if query.is_empty() {
        return None;
    }
    let padded = format!(" {query} ");
    FAMOUS_SOURCES
        .iter()
        .find(|source| {
            source.exact_names.iter().any(|name| canonical(name) == query)
                || source.names.iter().any(|name| {
                    let name = canonical(name);
                    !name.is_empty() && padded.contains(&format!(" {name} "))
                })
        })
        .map(|source| source.target)
}

/// Fetch the records a famous-source query names, each scored 1.0.
pub async fn direct_lookup(store: &dyn DocumentStore, query: &str) -> Result<Vec<RankedResult>> {
    let Some(target) = match_famous_source(query) else {
        return Ok(Vec::new());
    };

    let docs = store.fetch(&target.keys()).await?;
    tracing::info!(query, found = docs.len(), "direct lookup matched {target:?}");

    Ok(docs
        .into_iter()
        .map(|doc| {
            let mut r = RankedResult::new(doc);
            r.score = 1.0;
            r.scores.fused_score = Some(1.0);
            r.direct_lookup = true;
            r
        })
        .collect())
}

/// Prepend direct hits for this list's corpus and drop pipeline results
/// with the same identity.
pub fn merge_direct(results: Vec<RankedResult>, direct: &[RankedResult]) -> Vec<RankedResult> {
    let Some(corpus) = results.first().map(|r| r.corpus()).or_else(|| direct.first().map(|r| r.corpus())) else {
        return results;
    };
    let hits: Vec<&RankedResult> = direct.iter().filter(|r| r.corpus() == corpus).collect();
    if hits.is_empty() {
        return results;
    }

    let keys: HashSet<DocKey> = hits.iter().map(|r| r.key()).collect();
    let mut merged: Vec<RankedResult> = hits.into_iter().cloned().collect();
    merged.extend(results.into_iter().filter(|r| !keys.contains(&r.key())));
    merged
}
