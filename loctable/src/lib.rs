//! Text-safety core for string-table localization
//!
//! Everything in this crate is pure and synchronous: placeholder protection,
//! glossary matching and enforcement, change classification and quality checks.
//!
//! ```ignore
//! use loctable::{GlossaryTerm, enforce, protect, restore};
//!
//! let terms = vec![GlossaryTerm::new("DMG", "SCH", "de-DE")];
//! let protected = protect("Deal {0} DMG");          // "Deal ⟦PH_1⟧ DMG"
//! let enforced = enforce(&protected.protected, &terms); // "Deal ⟦PH_1⟧ ⟦TERM_1⟧"
//!
//! let translated = "Verursacht ⟦PH_1⟧ ⟦TERM_1⟧";
//! let restored = restore(translated, &enforced.map);
//! let final_text = protected.reinject(&restored.text)?; // "Verursacht {0} SCH"
//! ```

pub mod change;
pub mod error;
pub mod glossary;
pub mod locale;
pub mod qa;
pub mod segment;
pub mod token_guard;

pub use change::{ChangeClassification, ChangeDecision, ChangeRule, classify};
pub use error::{GuardError, GuardResult};
pub use glossary::{
    CompoundStrategy, EnforcedText, ExpectedEnforcement, Glossary, GlossaryTerm, MatchPolicy,
    RestoredText, TermMatch, TermRule, TermScope, TermTokenMap, enforce, find_matches,
    merge_terms, restore,
};
pub use locale::{base_language, canonicalize, parse_locale};
pub use qa::{IssueKind, QaIssue, Severity, has_blocking_issue};
pub use segment::{CandidateOrigin, Segment, SegmentContext};
pub use token_guard::{
    DetectedToken, ProtectedText, ProtectedToken, TokenKind, detect_tokens, protect, reinject,
    validate,
};
