//! Token Guard: protection of placeholders and markup during translation
//!
//! Machine-readable spans (`{0}`, `{{name}}`, `%1$s`, `\n`, `<color=#FF0000>`, ...)
//! are replaced by numbered markers of the form `⟦PH_n⟧` before text is sent to a
//! generator, and put back byte-for-byte afterwards.
//!
//! # Example
//!
//! ```ignore
//! Source:     "Deal {0} damage\nto <b>all</b>"
//! Protected:  "Deal ⟦PH_1⟧ damage⟦PH_2⟧to ⟦PH_3⟧all⟦PH_4⟧"
//! Translated: "Verursacht ⟦PH_1⟧ Schaden⟦PH_2⟧an ⟦PH_3⟧allen⟦PH_4⟧"
//! Reinjected: "Verursacht {0} Schaden\nan <b>allen</b>"
//! ```
//!
//! Marker numbering is local to one [`protect`] call, so independent rows can be
//! protected concurrently without sharing any state.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};
use crate::qa::{IssueKind, QaIssue};

/// Unity/TextMeshPro style rich-text tag names recognised as markup.
const TAG_NAMES: &str = "b|i|u|s|color|size|sprite|material|quad|font|link|style|mark|sup|sub|align|alpha|br|nobr|noparse|indent|line-height|line-indent|voffset|cspace|mspace|pos|rotate|width|margin|gradient|lowercase|uppercase|smallcaps";

static DETECTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Alternation order only matters for matches starting at the same offset;
    // the leftmost match always wins.
    let pattern = format!(
        concat!(
            r"(?P<double_curly>\{{\{{[^{{}}\r\n]+\}}\}})",
            r"|(?P<curly>\{{(?:\d+|[A-Za-z_][A-Za-z0-9_]*)\}})",
            r"|(?P<percent>%(?:\d+\$)?(?:\.\d+)?[sdf])",
            r"|(?P<escape_newline>\\n)",
            r"|(?P<newline>\r\n|\n)",
            r"|(?P<tag>(?i:</?(?:{})(?:=[^<>\r\n]+|\s+[A-Za-z-]+=[^<>\r\n]*)?>))"
        ),
        TAG_NAMES
    );
    Regex::new(&pattern).expect("token detection pattern is valid")
});

static MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⟦PH_(\d+)⟧").expect("marker pattern is valid"));

/// Kind of a protected span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
    /// `{0}`, `{name}`
    Curly,
    /// `{{name}}`
    DoubleCurly,
    /// `%s`, `%d`, `%1$s`
    Percent,
    /// The two characters `\` `n`
    EscapeNewline,
    /// A real line break (`\n` or `\r\n`)
    Newline,
    /// `<b>`, `</color>`, `<size=12>`, `<sprite=3>`
    Tag,
    /// A glossary substitution produced by the enforcer
    GlossaryTerm,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Curly => "curly",
            TokenKind::DoubleCurly => "double-curly",
            TokenKind::Percent => "percent",
            TokenKind::EscapeNewline => "escape-newline",
            TokenKind::Newline => "newline",
            TokenKind::Tag => "tag",
            TokenKind::GlossaryTerm => "glossary-term",
        }
    }

    /// True for format placeholders (curly, double-curly, percent)
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            TokenKind::Curly | TokenKind::DoubleCurly | TokenKind::Percent
        )
    }

    pub fn is_line_break(&self) -> bool {
        matches!(self, TokenKind::EscapeNewline | TokenKind::Newline)
    }
}

/// A span found by the detection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedToken {
    pub kind: TokenKind,
    /// Exact original substring
    pub value: String,
    /// Byte offset where the span starts
    pub start: usize,
    /// Byte offset one past the end of the span
    pub end: usize,
}

/// A marker together with the substring it stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedToken {
    /// 1-based position of this token within its protect call
    pub index: usize,
    /// The marker string, e.g. `⟦PH_1⟧`
    pub marker: String,
    pub kind: TokenKind,
    pub value: String,
}

impl ProtectedToken {
    pub fn new(index: usize, kind: TokenKind, value: impl Into<String>) -> Self {
        ProtectedToken {
            index,
            marker: placeholder_marker(index),
            kind,
            value: value.into(),
        }
    }
}

/// Build the marker string for a placeholder index
pub fn placeholder_marker(index: usize) -> String {
    format!("⟦PH_{}⟧", index)
}

/// Output of [`protect`]: the protected string plus the ordered token list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedText {
    pub original: String,
    pub protected: String,
    pub tokens: Vec<ProtectedToken>,
}

impl ProtectedText {
    /// Whether any format placeholder was protected
    pub fn has_placeholders(&self) -> bool {
        self.tokens.iter().any(|t| t.kind.is_placeholder())
    }

    /// Whether any markup tag was protected
    pub fn has_tags(&self) -> bool {
        self.tokens.iter().any(|t| t.kind == TokenKind::Tag)
    }

    /// Strict reinjection, see [`reinject`]
    pub fn reinject(&self, translated: &str) -> GuardResult<String> {
        reinject(self, translated)
    }

    /// Replace every known marker with its value and leave everything else as is.
    ///
    /// Used to keep a visible candidate after [`reinject`] has already failed.
    pub fn reinject_lossy(&self, translated: &str) -> String {
        let by_index: HashMap<usize, &str> = self
            .tokens
            .iter()
            .map(|t| (t.index, t.value.as_str()))
            .collect();
        MARKER_PATTERN
            .replace_all(translated, |caps: &regex::Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| by_index.get(&index))
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Find every protectable span in `text`, left to right, non-overlapping.
pub fn detect_tokens(text: &str) -> Vec<DetectedToken> {
    DETECTION_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let (kind, m) = [
                (TokenKind::DoubleCurly, "double_curly"),
                (TokenKind::Curly, "curly"),
                (TokenKind::Percent, "percent"),
                (TokenKind::EscapeNewline, "escape_newline"),
                (TokenKind::Newline, "newline"),
                (TokenKind::Tag, "tag"),
            ]
            .into_iter()
            .find_map(|(kind, name)| caps.name(name).map(|m| (kind, m)))?;
            Some(DetectedToken {
                kind,
                value: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
            })
        })
        .collect()
}

/// Replace every detected span with a numbered marker.
///
/// # Example
///
/// ```ignore
/// let protected = protect("Heal {0} HP");
/// assert_eq!(protected.protected, "Heal ⟦PH_1⟧ HP");
/// assert_eq!(protected.tokens[0].value, "{0}");
/// ```
pub fn protect(text: &str) -> ProtectedText {
    let detected = detect_tokens(text);
    let mut protected = String::with_capacity(text.len());
    let mut tokens = Vec::with_capacity(detected.len());
    let mut cursor = 0;

    for (offset, found) in detected.into_iter().enumerate() {
        let token = ProtectedToken::new(offset + 1, found.kind, found.value);
        protected.push_str(&text[cursor..found.start]);
        protected.push_str(&token.marker);
        cursor = found.end;
        tokens.push(token);
    }
    protected.push_str(&text[cursor..]);

    ProtectedText {
        original: text.to_string(),
        protected,
        tokens,
    }
}

/// Put the original substrings back in place of their markers.
///
/// Every marker of `protected` must occur exactly once in `translated`, and no
/// other `⟦PH_n⟧` marker may appear. Any deviation is a
/// [`GuardError::TokenMismatch`]; the caller decides how to surface it.
pub fn reinject(protected: &ProtectedText, translated: &str) -> GuardResult<String> {
    let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
    let mut unknown = Vec::new();
    let known: HashMap<usize, &ProtectedToken> =
        protected.tokens.iter().map(|t| (t.index, t)).collect();

    for caps in MARKER_PATTERN.captures_iter(translated) {
        match caps[1].parse::<usize>() {
            Ok(index) if known.contains_key(&index) => *seen.entry(index).or_insert(0) += 1,
            _ => unknown.push(caps[0].to_string()),
        }
    }

    let missing: Vec<String> = protected
        .tokens
        .iter()
        .filter(|t| !seen.contains_key(&t.index))
        .map(|t| t.marker.clone())
        .collect();
    let duplicated: Vec<String> = seen
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(index, _)| placeholder_marker(*index))
        .collect();

    if !missing.is_empty() || !duplicated.is_empty() || !unknown.is_empty() {
        return Err(GuardError::TokenMismatch {
            missing,
            duplicated,
            unknown,
        });
    }

    Ok(protected.reinject_lossy(translated))
}

/// Compare protected spans between a source string and its final translation.
///
/// Runs independently of [`reinject`]: the token multiset must match in count and
/// content, and every line-break form must occur the same number of times. A
/// different order of otherwise identical tokens is reported as a warning.
pub fn validate(source: &str, final_text: &str) -> Vec<QaIssue> {
    let source_tokens = detect_tokens(source);
    let final_tokens = detect_tokens(final_text);
    let mut issues = Vec::new();

    let source_values: Vec<&str> = source_tokens
        .iter()
        .filter(|t| !t.kind.is_line_break())
        .map(|t| t.value.as_str())
        .collect();
    let final_values: Vec<&str> = final_tokens
        .iter()
        .filter(|t| !t.kind.is_line_break())
        .map(|t| t.value.as_str())
        .collect();

    if source_values.len() != final_values.len() {
        issues.push(QaIssue::error(
            IssueKind::PlaceholderMismatch,
            format!(
                "Placeholder count changed (expected {}, found {})",
                source_values.len(),
                final_values.len()
            ),
        ));
    }

    let expected = count_values(&source_values);
    let found = count_values(&final_values);
    let all_values: std::collections::BTreeSet<&str> =
        expected.keys().chain(found.keys()).copied().collect();
    for value in all_values {
        let want = expected.get(value).copied().unwrap_or(0);
        let got = found.get(value).copied().unwrap_or(0);
        if got < want {
            issues.push(
                QaIssue::error(
                    IssueKind::PlaceholderMismatch,
                    format!("Missing placeholder '{value}' (expected {want}, found {got})"),
                )
                .with_detail("value", value),
            );
        } else if got > want {
            issues.push(
                QaIssue::error(
                    IssueKind::PlaceholderMismatch,
                    format!("Extra placeholder '{value}' (expected {want}, found {got})"),
                )
                .with_detail("value", value),
            );
        }
    }

    if issues.is_empty() && source_values != final_values {
        issues.push(QaIssue::warn(
            IssueKind::PlaceholderMismatch,
            "Placeholder order changed",
        ));
    }

    let source_breaks = line_break_counts(&source_tokens);
    let final_breaks = line_break_counts(&final_tokens);
    for form in ["\\n", "\n", "\r\n"] {
        let want = source_breaks.get(form).copied().unwrap_or(0);
        let got = final_breaks.get(form).copied().unwrap_or(0);
        if want != got {
            issues.push(
                QaIssue::error(
                    IssueKind::NewlineMismatch,
                    format!(
                        "{} count changed (expected {want}, found {got})",
                        describe_line_break(form)
                    ),
                )
                .with_detail("form", form.escape_default().to_string()),
            );
        }
    }

    issues
}

fn count_values<'a>(values: &[&'a str]) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for value in values {
        *counts.entry(*value).or_insert(0) += 1;
    }
    counts
}

fn line_break_counts(tokens: &[DetectedToken]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for token in tokens.iter().filter(|t| t.kind.is_line_break()) {
        *counts.entry(token.value.as_str()).or_insert(0) += 1;
    }
    counts
}

fn describe_line_break(form: &str) -> &'static str {
    match form {
        "\\n" => "Escaped newline",
        "\r\n" => "CRLF newline",
        _ => "Newline",
    }
}
