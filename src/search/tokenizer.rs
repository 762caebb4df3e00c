/// Text normalization for the lexical index
///
/// Terms are maximal runs of ASCII letters bounded by word boundaries, so
/// digits, punctuation and mixed alphanumerics such as `bert2` never produce
/// a term. Terms are lowercased, stop words and terms of two letters or fewer
/// are dropped. Order and duplicates are preserved because term frequency
/// matters downstream.

use std::sync::OnceLock;

use regex::Regex;

/// Closed set of function words never indexed.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "can", "this", "that", "these",
    "those",
];

/// Terms must be longer than this many characters.
const MIN_TERM_LEN: usize = 2;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[a-zA-Z]+\b").expect("static pattern compiles"))
}

fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.contains(&term)
}

/// Tokenize text into index terms.
///
/// # Example
///
/// ```
/// use scholarnet::search::tokenizer::tokenize;
///
/// let tokens = tokenize("The Attention Is All You Need");
/// assert_eq!(tokens, vec!["attention", "need"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let lowered = text.to_lowercase();
    word_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|term| term.len() > MIN_TERM_LEN && !is_stop_word(term))
        .map(String::from)
        .collect()
}

/// Tokenize optional text; absent text yields no terms.
pub fn tokenize_opt(text: Option<&str>) -> Vec<String> {
    text.map(tokenize).unwrap_or_default()
}
