//! Glossary terms, matching and enforcement

pub mod enforcer;
pub mod matcher;
pub mod term;

pub use enforcer::{
    EnforcedText, ExpectedEnforcement, RestoredText, TermTokenMap, enforce, restore, term_marker,
};
pub use matcher::{TermMatch, find_matches, is_boundary, tokenize};
pub use term::{
    CompoundStrategy, Glossary, GlossaryTerm, MatchPolicy, TermRule, TermScope, merge_terms,
};
