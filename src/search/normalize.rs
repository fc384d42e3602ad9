//! Arabic-aware text normalization.
//!
//! The same function runs over indexed text and over queries. If the two
//! ever diverge, keyword matching fails silently, so every component that
//! compares text goes through [`normalize_arabic`].

const ALEF: char = '\u{0627}';
const HEH: char = '\u{0647}';

/// Tashkeel (fathatan through wavy hamza below), the superscript alef and
/// tatweel.
fn is_diacritic(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{065F}' | '\u{0670}' | '\u{0640}')
}

fn fold_letter(c: char) -> char {
    match c {
        // hamza above, hamza below, madda, wasla
        '\u{0623}' | '\u{0625}' | '\u{0622}' | '\u{0671}' => ALEF,
        // teh marbuta
        '\u{0629}' => HEH,
        other => other,
    }
}

/// Strip diacritics and tatweel, unify alef variants and teh marbuta, and collapse
/// whitespace runs to a single space.
pub fn normalize_arabic(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if is_diacritic(c) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(fold_letter(c));
    }

    out
}

/// True for characters in the Arabic Unicode blocks.
pub fn is_arabic_char(c: char) -> bool {
    matches!(
        c,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}

/// Characters kept inside a word: Arabic script and alphanumerics, minus
/// the Arabic comma, semicolon, question mark and full stop.
pub fn is_word_char(c: char) -> bool {
    (is_arabic_char(c) || c.is_alphanumeric())
        && !matches!(c, '\u{060C}' | '\u{061B}' | '\u{061F}' | '\u{06D4}')
}

/// Number of non-whitespace characters after normalization.
pub fn significant_len(text: &str) -> usize {
    normalize_arabic(text)
        .chars()
        .filter(|c| !c.is_whitespace())
        .count()
}
