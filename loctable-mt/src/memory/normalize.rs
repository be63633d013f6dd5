//! Text normalization, hashing and similarity for translation memory lookups

use sha2::{Digest, Sha256};
use similar::TextDiff;

/// Trim, collapse internal whitespace runs to one space and lowercase
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 of the normalized text, hex encoded
pub fn source_hash(text: &str) -> String {
    let digest = Sha256::digest(normalize_text(text).as_bytes());
    hex::encode(digest)
}

/// Build an FTS5 `MATCH` expression from the words of `text`.
///
/// Words are lowercased alphanumeric runs, deduplicated in first-seen order,
/// quoted and joined with `OR`. Returns `None` when the text has no words.
pub fn fts_query(text: &str) -> Option<String> {
    let mut seen: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
    {
        if !seen.contains(&word) {
            seen.push(word);
        }
    }
    if seen.is_empty() {
        return None;
    }
    Some(
        seen.iter()
            .map(|w| format!("\"{w}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Character-level similarity of two texts after normalization, 0.0 to 100.0
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a == b {
        return 100.0;
    }
    let ratio = TextDiff::from_chars(a.as_str(), b.as_str()).ratio();
    f64::from(ratio) * 100.0
}
