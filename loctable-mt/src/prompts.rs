//! Instruction text sent to generators
//!
//! Generators that ignore the marker rules are caught by reinjection and QA.

use loctable::SegmentContext;

pub const DEFAULT_STYLE_HINTS: &str = "informal, use Du for German";

const MARKER_RULES: &str = "Do not modify placeholder tokens like ⟦PH_*⟧ and term tokens like ⟦TERM_*⟧.\n\
Keep actual newlines and escaped \\n unchanged.";

fn style_or_default(style_hints: &str) -> &str {
    let trimmed = style_hints.trim();
    if trimmed.is_empty() {
        DEFAULT_STYLE_HINTS
    } else {
        trimmed
    }
}

fn context_lines(context: Option<&SegmentContext>) -> String {
    let Some(context) = context else {
        return String::new();
    };
    let mut lines = String::new();
    if let Some(key) = &context.key {
        lines.push_str(&format!("KEY: {key}\n"));
    }
    if let Some(filename) = &context.filename {
        lines.push_str(&format!("FILE: {filename}\n"));
    }
    if let Some(category) = &context.category {
        lines.push_str(&format!("CATEGORY: {category}\n"));
    }
    lines
}

/// Prompt for a first-pass translation of tokenized text
pub fn translation_prompt(
    source_text: &str,
    protected_text: &str,
    target_locale: &str,
    style_hints: &str,
    context: Option<&SegmentContext>,
) -> String {
    format!(
        "Translate the source to {target_locale}. Style hints: {}.\n{MARKER_RULES}\n\
Output only the translated string.\n{}SOURCE: {source_text}\nPROTECTED: {protected_text}",
        style_or_default(style_hints),
        context_lines(context),
    )
}

/// Prompt for a review pass over a tokenized draft
pub fn review_prompt(
    source_text: &str,
    draft_text: &str,
    target_locale: &str,
    style_hints: &str,
) -> String {
    format!(
        "Review and improve this {target_locale} translation. Style hints: {}.\n{MARKER_RULES}\n\
Output only the revised translation string.\nSOURCE: {source_text}\nDRAFT: {draft_text}",
        style_or_default(style_hints),
    )
}

/// Prompt asking whether a source revision invalidates an existing translation.
///
/// The expected answer is a JSON object:
/// `{"decision": "KEEP|UPDATE|FLAG", "confidence": 0.0-1.0, "reason": "..."}`
pub fn change_resolution_prompt(old_text: &str, new_text: &str, target_locale: &str) -> String {
    format!(
        "A source string was edited. Decide whether its existing {target_locale} translation \
must change.\nAnswer KEEP if the meaning is the same, UPDATE if the translation must change, \
FLAG if unsure.\nOutput only JSON: {{\"decision\": \"KEEP|UPDATE|FLAG\", \"confidence\": 0.0-1.0, \
\"reason\": \"...\"}}\nOLD: {old_text}\nNEW: {new_text}"
    )
}
