//! Change-impact classification for revised source text
//!
//! [`classify`] is a deterministic ladder; the first rule that applies decides.
//!
//! | Rule | Condition | Decision |
//! |------|-----------|----------|
//! | whitespace-only | equal after trimming and collapsing whitespace | KEEP |
//! | punctuation-only | equal token sequence after dropping punctuation | KEEP |
//! | placeholder-drift | placeholder/tag values differ | FLAG |
//! | substantial-edit | char delta > 30% or word delta > 20% | UPDATE |
//! | ambiguous | anything else | FLAG |
//!
//! Only the final `ambiguous` FLAG may be handed to an escalation step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::token_guard::detect_tokens;

const CHAR_DELTA_THRESHOLD: f64 = 0.30;
const WORD_DELTA_THRESHOLD: f64 = 0.20;

const PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '…', '\'', '"', '`', '‘', '’', '“', '”', '«', '»', '¡', '¿',
    '。', '、', '！', '？', '；', '：', '(', ')', '[', ']', '-', '–', '—',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeDecision {
    /// Existing translation still fits; no new candidate
    Keep,
    /// Retranslate
    Update,
    /// Needs a human look
    Flag,
}

impl ChangeDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeDecision::Keep => "KEEP",
            ChangeDecision::Update => "UPDATE",
            ChangeDecision::Flag => "FLAG",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "KEEP" => Some(ChangeDecision::Keep),
            "UPDATE" => Some(ChangeDecision::Update),
            "FLAG" => Some(ChangeDecision::Flag),
            _ => None,
        }
    }

    /// UPDATE and FLAG rows get a proposed candidate, KEEP rows do not
    pub fn needs_candidate(&self) -> bool {
        !matches!(self, ChangeDecision::Keep)
    }
}

impl std::fmt::Display for ChangeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeRule {
    WhitespaceOnly,
    PunctuationOnly,
    PlaceholderDrift,
    SubstantialEdit,
    Ambiguous,
    /// Decided by an external escalation step
    Escalated,
}

impl ChangeRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeRule::WhitespaceOnly => "whitespace-only",
            ChangeRule::PunctuationOnly => "punctuation-only",
            ChangeRule::PlaceholderDrift => "placeholder-drift",
            ChangeRule::SubstantialEdit => "substantial-edit",
            ChangeRule::Ambiguous => "ambiguous",
            ChangeRule::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            ChangeRule::WhitespaceOnly,
            ChangeRule::PunctuationOnly,
            ChangeRule::PlaceholderDrift,
            ChangeRule::SubstantialEdit,
            ChangeRule::Ambiguous,
            ChangeRule::Escalated,
        ]
        .into_iter()
        .find(|rule| rule.as_str() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeClassification {
    pub decision: ChangeDecision,
    /// 0.0 ..= 1.0
    pub confidence: f64,
    pub reason: String,
    pub rule: ChangeRule,
}

impl ChangeClassification {
    fn new(decision: ChangeDecision, confidence: f64, rule: ChangeRule, reason: String) -> Self {
        ChangeClassification {
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
            rule,
        }
    }

    /// Whether an escalation step may override this result
    pub fn is_escalatable(&self) -> bool {
        self.decision == ChangeDecision::Flag && self.rule == ChangeRule::Ambiguous
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn punctuation_free_tokens(text: &str) -> Vec<String> {
    text.chars()
        .map(|c| if PUNCTUATION.contains(&c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn protected_values(text: &str) -> BTreeMap<String, usize> {
    let mut values = BTreeMap::new();
    for token in detect_tokens(text)
        .into_iter()
        .filter(|t| !t.kind.is_line_break())
    {
        *values.entry(token.value).or_insert(0) += 1;
    }
    values
}

fn relative_delta(old: usize, new: usize) -> f64 {
    old.abs_diff(new) as f64 / old.max(1) as f64
}

/// Classify a source revision from `old_text` to `new_text`.
pub fn classify(old_text: &str, new_text: &str) -> ChangeClassification {
    if collapse_whitespace(old_text) == collapse_whitespace(new_text) {
        return ChangeClassification::new(
            ChangeDecision::Keep,
            0.95,
            ChangeRule::WhitespaceOnly,
            "Only whitespace changed".to_string(),
        );
    }

    if punctuation_free_tokens(old_text) == punctuation_free_tokens(new_text) {
        return ChangeClassification::new(
            ChangeDecision::Keep,
            0.9,
            ChangeRule::PunctuationOnly,
            "Only punctuation changed".to_string(),
        );
    }

    let old_values = protected_values(old_text);
    let new_values = protected_values(new_text);
    if old_values != new_values {
        let removed: Vec<&str> = old_values
            .keys()
            .filter(|v| !new_values.contains_key(*v))
            .map(String::as_str)
            .collect();
        let added: Vec<&str> = new_values
            .keys()
            .filter(|v| !old_values.contains_key(*v))
            .map(String::as_str)
            .collect();
        return ChangeClassification::new(
            ChangeDecision::Flag,
            0.9,
            ChangeRule::PlaceholderDrift,
            format!(
                "Placeholders or tags changed (removed {:?}, added {:?})",
                removed, added
            ),
        );
    }

    let char_delta = relative_delta(old_text.chars().count(), new_text.chars().count());
    let word_delta = relative_delta(
        old_text.split_whitespace().count(),
        new_text.split_whitespace().count(),
    );
    if char_delta > CHAR_DELTA_THRESHOLD || word_delta > WORD_DELTA_THRESHOLD {
        return ChangeClassification::new(
            ChangeDecision::Update,
            0.75,
            ChangeRule::SubstantialEdit,
            format!(
                "Substantial edit (characters {:.0}%, words {:.0}%)",
                char_delta * 100.0,
                word_delta * 100.0
            ),
        );
    }

    ChangeClassification::new(
        ChangeDecision::Flag,
        0.4,
        ChangeRule::Ambiguous,
        "Small wording change; meaning may differ".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_only_is_keep() {
        let result = classify("Hello world", "Hello  world");
        assert_eq!(result.decision, ChangeDecision::Keep);
        assert_eq!(result.rule, ChangeRule::WhitespaceOnly);
        assert!(result.confidence >= 0.9);
        assert_eq!(classify(" Hello world\t", "Hello world").decision, ChangeDecision::Keep);
    }

    #[test]
    fn test_whitespace_rule_is_case_sensitive() {
        let result = classify("Hello world", "hello world");
        assert_ne!(result.rule, ChangeRule::WhitespaceOnly);
    }

    #[test]
    fn test_punctuation_only_is_keep() {
        let result = classify("Hello!", "Hello.");
        assert_eq!(result.decision, ChangeDecision::Keep);
        assert_eq!(result.rule, ChangeRule::PunctuationOnly);
        assert_eq!(classify("«Ready»", "\"Ready\"").decision, ChangeDecision::Keep);
    }

    #[test]
    fn test_substantial_edit_is_update() {
        let result = classify("Deal 5 DMG", "Deal 50 DMG to target");
        assert_eq!(result.decision, ChangeDecision::Update);
        assert_eq!(result.rule, ChangeRule::SubstantialEdit);

        assert_eq!(classify("Attack", "Attack right now").decision, ChangeDecision::Update);
    }

    #[test]
    fn test_placeholder_drift_is_flag() {
        let result = classify("Heal {0}", "Heal <b>{0}</b>");
        assert_eq!(result.decision, ChangeDecision::Flag);
        assert_eq!(result.rule, ChangeRule::PlaceholderDrift);
        assert!(!result.is_escalatable());

        assert_eq!(classify("Use {0}", "Use {1}").rule, ChangeRule::PlaceholderDrift);
    }

    #[test]
    fn test_placeholder_drift_wins_over_length() {
        let result = classify("Go", "Go to {0} and collect all of the {1} items");
        assert_eq!(result.rule, ChangeRule::PlaceholderDrift);
    }

    #[test]
    fn test_newline_changes_are_not_drift() {
        let result = classify("Deal damage\nnow", "Deal damage now");
        assert_eq!(result.decision, ChangeDecision::Keep);
    }

    #[test]
    fn test_small_edit_is_ambiguous_flag() {
        let result = classify("Deal fire damage to one enemy", "Deal ice damage to one enemy");
        assert_eq!(result.decision, ChangeDecision::Flag);
        assert_eq!(result.rule, ChangeRule::Ambiguous);
        assert!(result.is_escalatable());
        assert!(result.confidence < 0.5);
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!(ChangeDecision::parse("update"), Some(ChangeDecision::Update));
        assert_eq!(ChangeDecision::parse("maybe"), None);
        assert!(!ChangeDecision::Keep.needs_candidate());
        assert!(ChangeDecision::Flag.needs_candidate());
    }
}
