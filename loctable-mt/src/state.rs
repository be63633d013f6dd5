//! Per-row pipeline states
//!
//! ```text
//! PENDING → MEMORY_CHECKED → MEMORY_HIT ─────────────────────────────┐
//!                          └→ GENERATION_NEEDED → GENERATED → REVIEWED ─┤
//!                                                          └→ SKIPPED_REVIEW ┤
//!                                                                     QA_CHECKED → DONE
//! ```
//!
//! Only `PENDING` and `DONE` are persisted; the others exist during one run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowState {
    Pending,
    MemoryChecked,
    MemoryHit,
    GenerationNeeded,
    Generated,
    Reviewed,
    SkippedReview,
    QaChecked,
    Done,
}

impl RowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowState::Pending => "PENDING",
            RowState::MemoryChecked => "MEMORY_CHECKED",
            RowState::MemoryHit => "MEMORY_HIT",
            RowState::GenerationNeeded => "GENERATION_NEEDED",
            RowState::Generated => "GENERATED",
            RowState::Reviewed => "REVIEWED",
            RowState::SkippedReview => "SKIPPED_REVIEW",
            RowState::QaChecked => "QA_CHECKED",
            RowState::Done => "DONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            RowState::Pending,
            RowState::MemoryChecked,
            RowState::MemoryHit,
            RowState::GenerationNeeded,
            RowState::Generated,
            RowState::Reviewed,
            RowState::SkippedReview,
            RowState::QaChecked,
            RowState::Done,
        ]
        .into_iter()
        .find(|state| state.as_str() == value)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(&self, next: RowState) -> bool {
        use RowState::*;
        matches!(
            (self, next),
            (Pending, MemoryChecked)
                | (MemoryChecked, MemoryHit)
                | (MemoryChecked, GenerationNeeded)
                | (GenerationNeeded, Generated)
                | (Generated, Reviewed)
                | (Generated, SkippedReview)
                | (MemoryHit, QaChecked)
                | (Reviewed, QaChecked)
                | (SkippedReview, QaChecked)
                | (QaChecked, Done)
        )
    }
}

impl std::fmt::Display for RowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered record of the states one row passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrail {
    states: Vec<RowState>,
}

impl StateTrail {
    pub fn new() -> Self {
        StateTrail {
            states: vec![RowState::Pending],
        }
    }

    pub fn current(&self) -> RowState {
        self.states.last().copied().unwrap_or(RowState::Pending)
    }

    /// Move to `next`; illegal transitions are logged and ignored
    pub fn advance(&mut self, next: RowState) {
        let current = self.current();
        if current.can_advance_to(next) {
            tracing::trace!(from = %current, to = %next, "Row state transition");
            self.states.push(next);
        } else {
            tracing::warn!(from = %current, to = %next, "Ignoring illegal row state transition");
        }
    }

    pub fn states(&self) -> &[RowState] {
        &self.states
    }
}

impl Default for StateTrail {
    fn default() -> Self {
        Self::new()
    }
}
