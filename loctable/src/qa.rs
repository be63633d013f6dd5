//! Quality checks run on every translation candidate
//!
//! Each check returns a list of [`QaIssue`]s. Issues with [`Severity::Error`]
//! block the candidate from being treated as ready to approve; warnings do not.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::glossary::ExpectedEnforcement;
use crate::token_guard;

static TERM_MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⟦TERM_\d+⟧").expect("term marker pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "warn" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// Category of a QA flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    /// Placeholder markers could not be reinjected
    TokenMismatch,
    /// Glossary term markers could not be restored
    TermTokenMismatch,
    PlaceholderMismatch,
    NewlineMismatch,
    GlossaryViolation,
    LimitExceeded,
    /// The change classifier could not decide between KEEP and UPDATE
    AmbiguousChange,
    /// Source text changed since the baseline translation was made
    StaleSource,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::TokenMismatch => "token-mismatch",
            IssueKind::TermTokenMismatch => "term-token-mismatch",
            IssueKind::PlaceholderMismatch => "placeholder-mismatch",
            IssueKind::NewlineMismatch => "newline-mismatch",
            IssueKind::GlossaryViolation => "glossary-violation",
            IssueKind::LimitExceeded => "limit-exceeded",
            IssueKind::AmbiguousChange => "ambiguous-change",
            IssueKind::StaleSource => "stale-source",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            IssueKind::TokenMismatch,
            IssueKind::TermTokenMismatch,
            IssueKind::PlaceholderMismatch,
            IssueKind::NewlineMismatch,
            IssueKind::GlossaryViolation,
            IssueKind::LimitExceeded,
            IssueKind::AmbiguousChange,
            IssueKind::StaleSource,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == value)
    }
}

/// One finding of a quality check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    /// Human-readable message shown to the reviewer
    pub message: String,
    /// Structured context (offending token, expected count, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, String>,
}

impl QaIssue {
    pub fn new(kind: IssueKind, severity: Severity, message: impl Into<String>) -> Self {
        QaIssue {
            kind,
            severity,
            message: message.into(),
            detail: BTreeMap::new(),
        }
    }

    pub fn error(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Error, message)
    }

    pub fn warn(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warn, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// True when any issue blocks approval
pub fn has_blocking_issue(issues: &[QaIssue]) -> bool {
    issues.iter().any(QaIssue::is_blocking)
}

/// Placeholder and tag preservation, see [`token_guard::validate`]
pub fn check_placeholders(source: &str, final_text: &str) -> Vec<QaIssue> {
    token_guard::validate(source, final_text)
        .into_iter()
        .filter(|issue| issue.kind != IssueKind::NewlineMismatch)
        .collect()
}

/// Real and escaped newline counts must match the source
pub fn check_newlines(source: &str, final_text: &str) -> Vec<QaIssue> {
    token_guard::validate(source, final_text)
        .into_iter()
        .filter(|issue| issue.kind == IssueKind::NewlineMismatch)
        .collect()
}

/// Verify that glossary enforcement survived generation and restore.
///
/// * `expected` - enforcements made on the source text
/// * `final_text` - candidate after restore and reinjection
/// * `translated_with_markers` - raw generator output, when a generator was used
pub fn check_glossary_compliance(
    expected: &[ExpectedEnforcement],
    final_text: &str,
    translated_with_markers: Option<&str>,
) -> Vec<QaIssue> {
    if expected.is_empty() {
        return Vec::new();
    }
    let mut issues = Vec::new();

    if let Some(raw) = translated_with_markers {
        for item in expected.iter().filter(|item| !raw.contains(&item.marker)) {
            issues.push(
                QaIssue::error(
                    IssueKind::GlossaryViolation,
                    format!(
                        "Glossary marker '{}' for '{}' was modified or removed before restore",
                        item.marker, item.source_term
                    ),
                )
                .with_detail("marker", item.marker.clone()),
            );
        }
    }

    let mut unresolved: Vec<&str> = TERM_MARKER_PATTERN
        .find_iter(final_text)
        .map(|m| m.as_str())
        .collect();
    unresolved.sort_unstable();
    unresolved.dedup();
    for marker in unresolved {
        issues.push(
            QaIssue::error(
                IssueKind::GlossaryViolation,
                format!("Glossary marker '{marker}' was not restored in final output"),
            )
            .with_detail("marker", marker),
        );
    }

    let mut expected_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for item in expected.iter().filter(|item| !item.replacement.is_empty()) {
        *expected_counts.entry(item.replacement.as_str()).or_insert(0) += 1;
    }
    for (replacement, want) in expected_counts {
        let got = final_text.matches(replacement).count();
        if got < want {
            issues.push(
                QaIssue::error(
                    IssueKind::GlossaryViolation,
                    format!(
                        "Missing enforced glossary term '{replacement}' (expected at least {want}, found {got})"
                    ),
                )
                .with_detail("replacement", replacement)
                .with_detail("expected", want.to_string()),
            );
        }
    }

    issues
}

/// Character-limit enforcement. Exceeding the limit is always an error.
pub fn check_char_limit(final_text: &str, limit: Option<usize>) -> Vec<QaIssue> {
    let Some(limit) = limit else {
        return Vec::new();
    };
    let length = final_text.chars().count();
    if length <= limit {
        return Vec::new();
    }
    vec![
        QaIssue::error(
            IssueKind::LimitExceeded,
            format!("Text is {length} characters, limit is {limit}"),
        )
        .with_detail("length", length.to_string())
        .with_detail("limit", limit.to_string()),
    ]
}
