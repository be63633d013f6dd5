//! Glossary term matching
//!
//! Text is split into tokens at every alphanumeric/non-alphanumeric transition,
//! every lowercase-to-uppercase transition (`fireBall` -> `fire` `Ball`) and every
//! letter/digit transition (`DMG5` -> `DMG` `5`). A `whole-token` term must cover
//! exactly one token, so multi-word terms need the `exact` policy; a compound hit is a term that starts a token and is
//! followed by more alphanumerics of the same token (`DMGBoost`). A term found in
//! the middle of a token (`ADMGX`) is never matched.
//!
//! Matching runs in two passes: every term collects its candidate spans, then an
//! interval-resolution pass keeps a non-overlapping subset (longer source term
//! first, then earlier start). Nothing is rewritten here; see the enforcer.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use super::term::{GlossaryTerm, MatchPolicy};

static LOCKED_MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⟦(?:PH|TERM)_\d+⟧").expect("locked marker pattern is valid"));

/// Characters of context examined on each side of a match by negative patterns
const NEGATIVE_CONTEXT_CHARS: usize = 48;

/// One accepted occurrence of a glossary term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermMatch<'a> {
    pub term: &'a GlossaryTerm,
    /// Byte offset of the first matched character
    pub start: usize,
    /// Byte offset one past the span; for compounds, the end of the whole token
    pub end: usize,
    /// The exact text covered by the span
    pub surface: String,
    pub is_compound: bool,
}

impl TermMatch<'_> {
    pub fn term_id(&self) -> &str {
        &self.term.id
    }

    /// Trailing part of a compound token after the source term
    pub fn remainder(&self) -> &str {
        if !self.is_compound {
            return "";
        }
        let head = self.term.source_term.chars().count();
        let split = self
            .surface
            .char_indices()
            .nth(head)
            .map(|(i, _)| i)
            .unwrap_or(self.surface.len());
        &self.surface[split..]
    }
}

/// Text decomposed into characters with their byte offsets and token boundaries
struct Tokenized<'t> {
    text: &'t str,
    chars: Vec<char>,
    /// `offsets[i]` is the byte offset of char `i`; `offsets[len]` is `text.len()`
    offsets: Vec<usize>,
    /// `boundary[i]` is true when a token boundary sits before char `i`
    boundary: Vec<bool>,
    blocked: Vec<(usize, usize)>,
}

impl<'t> Tokenized<'t> {
    fn new(text: &'t str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());

        let mut boundary = vec![false; chars.len() + 1];
        boundary[0] = true;
        boundary[chars.len()] = true;
        for i in 1..chars.len() {
            boundary[i] = is_boundary(chars[i - 1], chars[i]);
        }

        let blocked = LOCKED_MARKER_PATTERN
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();

        Tokenized {
            text,
            chars,
            offsets,
            boundary,
            blocked,
        }
    }

    fn is_blocked(&self, start: usize, end: usize) -> bool {
        self.blocked.iter().any(|(s, e)| start < *e && *s < end)
    }

    /// Char index of the next boundary strictly after `from`
    fn token_end(&self, from: usize) -> usize {
        (from + 1..=self.chars.len())
            .find(|i| self.boundary[*i])
            .unwrap_or(self.chars.len())
    }

    fn matches_at(&self, at: usize, needle: &[char], case_sensitive: bool) -> bool {
        if at + needle.len() > self.chars.len() {
            return false;
        }
        self.chars[at..at + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| {
                if case_sensitive {
                    a == b
                } else {
                    a == b || a.to_lowercase().eq(b.to_lowercase())
                }
            })
    }
}

/// Token boundary rule between two adjacent characters
pub fn is_boundary(prev: char, cur: char) -> bool {
    prev.is_alphanumeric() != cur.is_alphanumeric()
        || (prev.is_lowercase() && cur.is_uppercase())
        || (prev.is_alphabetic() && cur.is_numeric())
        || (prev.is_numeric() && cur.is_alphabetic())
}

/// Split `text` into its alphanumeric tokens according to [`is_boundary`]
pub fn tokenize(text: &str) -> Vec<&str> {
    let tokenized = Tokenized::new(text);
    let mut tokens = Vec::new();
    let mut start = 0;
    for i in 1..=tokenized.chars.len() {
        if tokenized.boundary[i] {
            let piece = &text[tokenized.offsets[start]..tokenized.offsets[i]];
            if tokenized.chars[start].is_alphanumeric() {
                tokens.push(piece);
            }
            start = i;
        }
    }
    tokens
}

enum NegativePredicate {
    Regex(Regex),
    Literal { needle: String, case_sensitive: bool },
}

impl NegativePredicate {
    fn compile(pattern: &str, case_sensitive: bool) -> Self {
        match RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(regex) => NegativePredicate::Regex(regex),
            Err(_) => NegativePredicate::Literal {
                needle: pattern.to_string(),
                case_sensitive,
            },
        }
    }

    fn hits(&self, haystack: &str) -> bool {
        match self {
            NegativePredicate::Regex(regex) => regex.is_match(haystack),
            NegativePredicate::Literal {
                needle,
                case_sensitive: true,
            } => haystack.contains(needle.as_str()),
            NegativePredicate::Literal { needle, .. } => haystack
                .to_lowercase()
                .contains(needle.to_lowercase().as_str()),
        }
    }
}

fn is_negated(
    predicates: &[NegativePredicate],
    tokenized: &Tokenized<'_>,
    start_char: usize,
    end_char: usize,
) -> bool {
    if predicates.is_empty() {
        return false;
    }
    let from = start_char.saturating_sub(NEGATIVE_CONTEXT_CHARS);
    let to = (end_char + NEGATIVE_CONTEXT_CHARS).min(tokenized.chars.len());
    let context = &tokenized.text[tokenized.offsets[from]..tokenized.offsets[to]];
    predicates
        .iter()
        .any(|p| p.hits(tokenized.text) || p.hits(context))
}

struct Candidate<'a> {
    found: TermMatch<'a>,
    term_len: usize,
    order: usize,
}

fn collect_for_term<'a>(
    tokenized: &Tokenized<'_>,
    term: &'a GlossaryTerm,
    order: usize,
    out: &mut Vec<Candidate<'a>>,
) {
    let needle: Vec<char> = term.source_term.chars().collect();
    if needle.is_empty() {
        return;
    }
    let predicates: Vec<NegativePredicate> = term
        .negative_patterns
        .iter()
        .map(|p| NegativePredicate::compile(p, term.case_sensitive))
        .collect();

    let mut at = 0;
    while at + needle.len() <= tokenized.chars.len() {
        if !tokenized.matches_at(at, &needle, term.case_sensitive) {
            at += 1;
            continue;
        }
        let term_end = at + needle.len();
        let inside_one_token = (at + 1..term_end).all(|i| !tokenized.boundary[i]);
        let span_end = match term.match_policy {
            MatchPolicy::Exact => Some((term_end, false)),
            MatchPolicy::WholeToken if !tokenized.boundary[at] || !inside_one_token => None,
            MatchPolicy::WholeToken if tokenized.boundary[term_end] => Some((term_end, false)),
            MatchPolicy::WholeToken
                if term.allow_compounds && tokenized.chars[term_end].is_alphanumeric() =>
            {
                Some((tokenized.token_end(term_end), true))
            }
            MatchPolicy::WholeToken => None,
        };

        let Some((end_char, is_compound)) = span_end else {
            at += 1;
            continue;
        };
        let start = tokenized.offsets[at];
        let end = tokenized.offsets[end_char];
        if tokenized.is_blocked(start, end) || is_negated(&predicates, tokenized, at, end_char) {
            at += 1;
            continue;
        }

        out.push(Candidate {
            found: TermMatch {
                term,
                start,
                end,
                surface: tokenized.text[start..end].to_string(),
                is_compound,
            },
            term_len: needle.len(),
            order,
        });
        at = end_char;
    }
}

/// Find every glossary term occurrence in `text`, as a non-overlapping list
/// ordered by position.
pub fn find_matches<'a>(text: &str, terms: &'a [GlossaryTerm]) -> Vec<TermMatch<'a>> {
    if text.is_empty() || terms.is_empty() {
        return Vec::new();
    }
    let tokenized = Tokenized::new(text);
    let mut candidates = Vec::new();
    for (order, term) in terms.iter().enumerate().filter(|(_, t)| t.is_enforced()) {
        collect_for_term(&tokenized, term, order, &mut candidates);
    }
    resolve_overlaps(candidates)
}

/// Keep a non-overlapping subset: longer source term first, then earlier start,
/// then glossary order.
fn resolve_overlaps(mut candidates: Vec<Candidate<'_>>) -> Vec<TermMatch<'_>> {
    candidates.sort_by(|a, b| {
        b.term_len
            .cmp(&a.term_len)
            .then_with(|| a.found.start.cmp(&b.found.start))
            .then_with(|| a.order.cmp(&b.order))
    });

    let mut selected: Vec<TermMatch<'_>> = Vec::new();
    for candidate in candidates {
        let overlaps = selected
            .iter()
            .any(|m| candidate.found.start < m.end && m.start < candidate.found.end);
        if !overlaps {
            selected.push(candidate.found);
        }
    }
    selected.sort_by_key(|m| (m.start, m.end));
    selected
}
