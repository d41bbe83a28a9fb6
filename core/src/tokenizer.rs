use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    // Alphanumeric runs joined only by one-level bracket or quote groups, e.g. `Vec<T>`, `get(i)`, `Map[K,V]`.
    static ref PHRASE: Regex = {
        let inner = r#"[^()\[\]{}<>"'\s]*"#;
        let group = format!(r#"\({inner}\)|\[{inner}\]|\{{{inner}\}}|<{inner}>|"{inner}"|'{inner}'"#);
        Regex::new(&format!(r"^[A-Za-z0-9_]+(?:(?:{group})[A-Za-z0-9_]*)*$")).expect("valid regex")
    };
    static ref NON_ALPHA: Regex = Regex::new(r"[^A-Za-z]+").expect("valid regex");
}

/// Punctuation that may cling to a word at a sentence boundary without being part of it.
const SENTENCE_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', '"', '\''];

/// NFKC-normalize, collapse every whitespace run to a single space and trim.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.nfkc() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    out
}

/// True when every character is in the printable ASCII range (space through `~`).
pub fn is_printable_ascii(text: &str) -> bool {
    text.bytes().all(|b| (b' '..=b'~').contains(&b))
}

pub fn split_words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Whether a whitespace-delimited token is a valid phrase, ignoring trailing sentence punctuation.
/// Returns the phrase without that punctuation.
pub fn valid_phrase(token: &str) -> Option<&str> {
    let phrase = token.trim_end_matches(&['.', ',', ';', ':', '!', '?'][..]);
    if phrase.len() < 2 || !PHRASE.is_match(phrase) {
        return None;
    }
    Some(phrase)
}

/// Alphabetic runs of a phrase: `HashMap<String>` yields `HashMap`, `String`.
pub fn alpha_fragments(phrase: &str) -> impl Iterator<Item = &str> {
    NON_ALPHA.split(phrase).filter(|s| !s.is_empty())
}

/// Word equality that tolerates sentence punctuation stuck to either end of the text token.
pub fn token_matches(token: &str, query: &str) -> bool {
    token == query || token.trim_matches(SENTENCE_PUNCT) == query
}

/// Number of characters, which is what every length threshold is expressed in.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
