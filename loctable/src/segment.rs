//! Segments and translation candidate origins

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};

/// Optional structured context shown to the generator and reviewers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentContext {
    /// String table key, e.g. `ui.button.attack`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl SegmentContext {
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.filename.is_none() && self.category.is_none()
    }
}

/// One translatable row of a string table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub source_locale: String,
    pub source_text: String,
    /// Source text of the previous import, when the row changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_limit: Option<usize>,
    #[serde(default)]
    pub context: SegmentContext,
}

impl Segment {
    /// Create a segment; blank source text is rejected.
    pub fn new(id: &str, source_locale: &str, source_text: &str) -> GuardResult<Self> {
        if source_text.trim().is_empty() {
            return Err(GuardError::EmptySource(id.to_string()));
        }
        Ok(Segment {
            id: id.to_string(),
            source_locale: source_locale.to_string(),
            source_text: source_text.to_string(),
            prior_source_text: None,
            char_limit: None,
            context: SegmentContext::default(),
        })
    }

    pub fn with_char_limit(mut self, limit: usize) -> Self {
        self.char_limit = Some(limit);
        self
    }

    pub fn with_context(mut self, context: SegmentContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_prior_source(mut self, prior: &str) -> Self {
        self.prior_source_text = Some(prior.to_string());
        self
    }

    /// Replace the source text with a newer import of the same row.
    ///
    /// The current text moves to `prior_source_text`. Importing identical text
    /// keeps the existing prior value.
    pub fn reimport(&mut self, source_text: &str) -> GuardResult<()> {
        if source_text.trim().is_empty() {
            return Err(GuardError::EmptySource(self.id.clone()));
        }
        if source_text != self.source_text {
            let previous = std::mem::replace(&mut self.source_text, source_text.to_string());
            self.prior_source_text = Some(previous);
        }
        Ok(())
    }

    /// True when a prior source exists and differs from the current one
    pub fn has_source_change(&self) -> bool {
        self.prior_source_text
            .as_deref()
            .is_some_and(|prior| prior != self.source_text)
    }
}

/// Where a translation candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateOrigin {
    MemoryExact,
    MemoryFuzzy,
    Generated,
    GeneratedReviewed,
    ExistingBaseline,
    ChangeProposal,
    ManualEdit,
}

impl CandidateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateOrigin::MemoryExact => "memory-exact",
            CandidateOrigin::MemoryFuzzy => "memory-fuzzy",
            CandidateOrigin::Generated => "generated",
            CandidateOrigin::GeneratedReviewed => "generated-reviewed",
            CandidateOrigin::ExistingBaseline => "existing-baseline",
            CandidateOrigin::ChangeProposal => "change-proposal",
            CandidateOrigin::ManualEdit => "manual-edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory-exact" => Some(CandidateOrigin::MemoryExact),
            "memory-fuzzy" => Some(CandidateOrigin::MemoryFuzzy),
            "generated" => Some(CandidateOrigin::Generated),
            "generated-reviewed" => Some(CandidateOrigin::GeneratedReviewed),
            "existing-baseline" => Some(CandidateOrigin::ExistingBaseline),
            "change-proposal" => Some(CandidateOrigin::ChangeProposal),
            "manual-edit" => Some(CandidateOrigin::ManualEdit),
            _ => None,
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, CandidateOrigin::MemoryExact | CandidateOrigin::MemoryFuzzy)
    }
}

impl std::fmt::Display for CandidateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
