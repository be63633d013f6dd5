//! Glossary enforcement through locked term markers
//!
//! Every accepted [`TermMatch`](super::TermMatch) is replaced by a `⟦TERM_n⟧`
//! marker before generation. After generation the marker is swapped for the
//! enforced target text, so the generator never sees (and can never reword) a
//! term that the glossary fixes.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::matcher::{TermMatch, find_matches};
use super::term::{CompoundStrategy, GlossaryTerm};
use crate::qa::{IssueKind, QaIssue};

static TERM_MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⟦TERM_(\d+)⟧").expect("term marker pattern is valid"));

/// Build the marker string for a term index
pub fn term_marker(index: usize) -> String {
    format!("⟦TERM_{}⟧", index)
}

/// What one term marker stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedEnforcement {
    pub marker: String,
    pub term_id: String,
    pub source_term: String,
    /// The source text covered by the match
    pub surface: String,
    /// Text the marker is restored to
    pub replacement: String,
    pub start: usize,
    pub end: usize,
    pub is_compound: bool,
}

/// Marker to enforcement lookup for one enforced text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermTokenMap {
    entries: Vec<ExpectedEnforcement>,
}

impl TermTokenMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, marker: &str) -> Option<&ExpectedEnforcement> {
        self.entries.iter().find(|e| e.marker == marker)
    }

    pub fn entries(&self) -> &[ExpectedEnforcement] {
        &self.entries
    }
}

/// Output of [`enforce`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcedText {
    pub original: String,
    /// Text with every enforced term replaced by its marker
    pub enforced: String,
    pub map: TermTokenMap,
}

impl EnforcedText {
    pub fn expected(&self) -> &[ExpectedEnforcement] {
        self.map.entries()
    }

    /// The text a reviewer would read: markers replaced by their enforcement
    pub fn preview(&self) -> String {
        restore(&self.enforced, &self.map).text
    }
}

/// Output of [`restore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredText {
    pub text: String,
    pub issues: Vec<QaIssue>,
}

fn replacement_for(found: &TermMatch<'_>) -> String {
    if !found.is_compound {
        return found.term.target_term.clone();
    }
    match found.term.compound_strategy {
        CompoundStrategy::Hyphenate => format!("{}-{}", found.term.target_term, found.remainder()),
        CompoundStrategy::ReplacePrefix => format!("{}{}", found.term.target_term, found.remainder()),
        CompoundStrategy::KeepSource => found.surface.clone(),
    }
}

/// Replace every glossary match in `text` with a numbered term marker.
///
/// Markers are numbered from 1 in text order. Text without matches is returned
/// unchanged with an empty map.
pub fn enforce(text: &str, terms: &[GlossaryTerm]) -> EnforcedText {
    let found = find_matches(text, terms);
    let mut enforced = String::with_capacity(text.len());
    let mut entries = Vec::with_capacity(found.len());
    let mut cursor = 0;

    for (offset, hit) in found.iter().enumerate() {
        let marker = term_marker(offset + 1);
        enforced.push_str(&text[cursor..hit.start]);
        enforced.push_str(&marker);
        cursor = hit.end;
        entries.push(ExpectedEnforcement {
            marker,
            term_id: hit.term_id().to_string(),
            source_term: hit.term.source_term.clone(),
            surface: hit.surface.clone(),
            replacement: replacement_for(hit),
            start: hit.start,
            end: hit.end,
            is_compound: hit.is_compound,
        });
    }
    enforced.push_str(&text[cursor..]);

    if !entries.is_empty() {
        tracing::debug!(terms = entries.len(), "Enforced glossary terms");
    }

    EnforcedText {
        original: text.to_string(),
        enforced,
        map: TermTokenMap { entries },
    }
}

/// Swap term markers in `translated` back to their enforced text.
///
/// Restoration never fails. Missing, duplicated and unknown markers are
/// reported as blocking [`IssueKind::TermTokenMismatch`] issues; unknown
/// markers are left in the text as they are.
pub fn restore(translated: &str, map: &TermTokenMap) -> RestoredText {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut unknown: Vec<String> = Vec::new();
    let by_marker: HashMap<&str, &ExpectedEnforcement> = map
        .entries
        .iter()
        .map(|e| (e.marker.as_str(), e))
        .collect();

    let text = TERM_MARKER_PATTERN
        .replace_all(translated, |caps: &regex::Captures| {
            let marker = &caps[0];
            match by_marker.get(marker) {
                Some(entry) => {
                    *counts.entry(marker.to_string()).or_insert(0) += 1;
                    entry.replacement.clone()
                }
                None => {
                    unknown.push(marker.to_string());
                    marker.to_string()
                }
            }
        })
        .into_owned();

    let mut issues = Vec::new();
    for entry in &map.entries {
        match counts.get(&entry.marker).copied().unwrap_or(0) {
            0 => issues.push(
                QaIssue::error(
                    IssueKind::TermTokenMismatch,
                    format!(
                        "Glossary marker {} for '{}' is missing",
                        entry.marker, entry.source_term
                    ),
                )
                .with_detail("marker", entry.marker.clone()),
            ),
            1 => {}
            n => issues.push(
                QaIssue::error(
                    IssueKind::TermTokenMismatch,
                    format!("Glossary marker {} appears {n} times", entry.marker),
                )
                .with_detail("marker", entry.marker.clone())
                .with_detail("count", n.to_string()),
            ),
        }
    }
    unknown.dedup();
    for marker in unknown {
        issues.push(
            QaIssue::error(
                IssueKind::TermTokenMismatch,
                format!("Unknown glossary marker {marker}"),
            )
            .with_detail("marker", marker),
        );
    }

    RestoredText { text, issues }
}
