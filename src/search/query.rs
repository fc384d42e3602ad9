//! Query parsing and full-text query construction.

use std::fmt;

use serde::Serialize;

use super::normalize::{is_word_char, normalize_arabic};

/// Opening/closing pairs: ASCII, Arabic guillemets, low-high and
/// curly double quotes.
const QUOTE_PAIRS: [(char, char); 4] = [
    ('"', '"'),
    ('\u{00AB}', '\u{00BB}'),
    ('\u{201E}', '\u{201C}'),
    ('\u{201C}', '\u{201D}'),
];

/// A raw query split into exact phrases and bag-of-words terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedQuery {
    /// Multi-word exact sequences, words joined by a single space.
    pub phrases: Vec<String>,
    /// Single words, OR-combined.
    pub terms: Vec<String>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.terms.is_empty()
    }

    pub fn has_phrases(&self) -> bool {
        !self.phrases.is_empty()
    }

    /// Distinct terms across phrases and loose terms, in first-seen order.
    pub fn distinct_terms(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let words = self
            .phrases
            .iter()
            .flat_map(|p| p.split(' '))
            .chain(self.terms.iter().map(String::as_str));
        for w in words {
            if !w.is_empty() && !out.iter().any(|x| x == w) {
                out.push(w.to_string());
            }
        }
        out
    }
}

/// Keep only Arabic-script and alphanumeric characters.
fn clean_token(token: &str) -> String {
    token.chars().filter(|c| is_word_char(*c)).collect()
}

fn clean_words(segment: &str) -> Vec<String> {
    normalize_arabic(segment)
        .split_whitespace()
        .map(clean_token)
        .filter(|w| !w.is_empty())
        .collect()
}

fn closing_quote(open: char) -> Option<char> {
    QUOTE_PAIRS
        .iter()
        .find(|(o, _)| *o == open)
        .map(|(_, c)| *c)
}

/// Split a raw query into quoted phrases and loose terms.
///
/// A quoted segment with fewer than two words degrades to a term. An
/// unterminated quote treats the rest of the input as unquoted text.
pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut loose = String::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let close = closing_quote(c).and_then(|close| {
            chars[i + 1..]
                .iter()
                .position(|x| *x == close || (close == '\u{201C}' && *x == '\u{201D}'))
                .map(|offset| i + 1 + offset)
        });

        match close {
            Some(end) => {
                let inner: String = chars[i + 1..end].iter().collect();
                let words = clean_words(&inner);
                match words.len() {
                    0 => {}
                    1 => push_term(&mut parsed.terms, words.into_iter().next()),
                    _ => parsed.phrases.push(words.join(" ")),
                }
                loose.push(' ');
                i = end + 1;
            }
            None => {
                loose.push(c);
                i += 1;
            }
        }
    }

    for word in clean_words(&loose) {
        push_term(&mut parsed.terms, Some(word));
    }

    parsed
}

fn push_term(terms: &mut Vec<String>, word: Option<String>) {
    if let Some(w) = word {
        if !terms.contains(&w) {
            terms.push(w);
        }
    }
}

/// Full-text query expression: every phrase must match as an adjacent
/// sequence, and at least one term must match. Empty groups drop out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FtsQuery {
    pub phrases: Vec<Vec<String>>,
    pub terms: Vec<String>,
}

impl FtsQuery {
    pub fn from_parsed(parsed: &ParsedQuery) -> Self {
        Self {
            phrases: parsed
                .phrases
                .iter()
                .map(|p| p.split(' ').map(str::to_string).collect())
                .collect(),
            terms: parsed.terms.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.terms.is_empty()
    }
}

fn quote_lexeme(word: &str) -> String {
    format!("'{}'", word.replace('\'', "''"))
}

/// Renders PostgreSQL `tsquery` syntax, e.g. `('a' <-> 'b') & ('c' | 'd')`.
impl fmt::Display for FtsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut groups: Vec<String> = self
            .phrases
            .iter()
            .map(|words| {
                let inner: Vec<String> = words.iter().map(|w| quote_lexeme(w)).collect();
                format!("({})", inner.join(" <-> "))
            })
            .collect();

        if !self.terms.is_empty() {
            let inner: Vec<String> = self.terms.iter().map(|w| quote_lexeme(w)).collect();
            groups.push(format!("({})", inner.join(" | ")));
        }

        f.write_str(&groups.join(" & "))
    }
}
