//! Glossary term definitions and project/global merging

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};

/// How a term is located in source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// The term must start and end on token boundaries
    #[default]
    #[serde(alias = "whole_token", alias = "word-boundary", alias = "word_boundary")]
    WholeToken,
    /// Literal substring anywhere; meant for multi-word terms
    Exact,
}

/// Rewrite applied when a term is the leading part of a longer token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompoundStrategy {
    /// `DMGBoost` -> `SCH-Boost`
    #[default]
    Hyphenate,
    /// `DMGBoost` -> `SCHBoost`
    #[serde(alias = "replace_prefix")]
    ReplacePrefix,
    /// `DMGBoost` stays `DMGBoost`, but is still locked away from the generator
    #[serde(alias = "keep_source")]
    KeepSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TermRule {
    #[default]
    #[serde(alias = "must_use")]
    MustUse,
    Preferred,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermScope {
    #[default]
    Project,
    Global,
}

fn default_true() -> bool {
    true
}

/// One terminology rule for a single target locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    #[serde(default)]
    pub id: String,
    pub source_term: String,
    pub target_term: String,
    pub target_locale: String,
    #[serde(default)]
    pub match_policy: MatchPolicy,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub allow_compounds: bool,
    #[serde(default)]
    pub compound_strategy: CompoundStrategy,
    /// Substring or regex predicates; any hit suppresses the match
    #[serde(default)]
    pub negative_patterns: Vec<String>,
    #[serde(default)]
    pub scope: TermScope,
    #[serde(default)]
    pub rule: TermRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl GlossaryTerm {
    /// A case-sensitive, whole-token, must-use project term
    pub fn new(source_term: &str, target_term: &str, target_locale: &str) -> Self {
        let mut term = GlossaryTerm {
            id: String::new(),
            source_term: source_term.to_string(),
            target_term: target_term.to_string(),
            target_locale: target_locale.to_string(),
            match_policy: MatchPolicy::WholeToken,
            case_sensitive: true,
            allow_compounds: false,
            compound_strategy: CompoundStrategy::Hyphenate,
            negative_patterns: Vec::new(),
            scope: TermScope::Project,
            rule: TermRule::MustUse,
            notes: None,
        };
        term.id = term.default_id();
        term
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn with_compounds(mut self, strategy: CompoundStrategy) -> Self {
        self.allow_compounds = true;
        self.compound_strategy = strategy;
        self
    }

    pub fn with_negative_pattern(mut self, pattern: &str) -> Self {
        self.negative_patterns.push(pattern.to_string());
        self
    }

    pub fn global(mut self) -> Self {
        self.scope = TermScope::Global;
        self.id = self.default_id();
        self
    }

    fn default_id(&self) -> String {
        let scope = match self.scope {
            TermScope::Project => "project",
            TermScope::Global => "global",
        };
        format!("{}:{}:{}", scope, self.target_locale, self.source_term)
    }

    pub fn is_enforced(&self) -> bool {
        self.rule == TermRule::MustUse && !self.source_term.is_empty()
    }
}

/// A loaded set of glossary terms, possibly mixing scopes and locales
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glossary {
    pub terms: Vec<GlossaryTerm>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GlossaryFile {
    List(Vec<GlossaryTerm>),
    Wrapped { terms: Vec<GlossaryTerm> },
}

impl Glossary {
    pub fn new(terms: Vec<GlossaryTerm>) -> Self {
        Glossary { terms }
    }

    /// Parse a glossary from JSON, either a bare array of terms or `{"terms": [...]}`.
    pub fn from_json_str(json: &str) -> GuardResult<Self> {
        let parsed: GlossaryFile =
            serde_json::from_str(json).map_err(|e| GuardError::InvalidGlossary(e.to_string()))?;
        let mut terms = match parsed {
            GlossaryFile::List(terms) => terms,
            GlossaryFile::Wrapped { terms } => terms,
        };
        for term in terms.iter_mut() {
            term.negative_patterns.retain(|p| !p.trim().is_empty());
            if term.id.is_empty() {
                term.id = term.default_id();
            }
        }
        Ok(Glossary { terms })
    }

    /// Terms that apply to `target_locale`, project entries overriding global ones
    pub fn effective_terms(&self, target_locale: &str, include_global: bool) -> Vec<GlossaryTerm> {
        let (global, project): (Vec<GlossaryTerm>, Vec<GlossaryTerm>) = self
            .terms
            .iter()
            .cloned()
            .partition(|t| t.scope == TermScope::Global);
        let global = if include_global { global } else { Vec::new() };
        merge_terms(&global, &project, target_locale)
    }
}

/// Merge global and project terms for one target locale.
///
/// Project terms replace global terms with the same source term. The result is
/// ordered longest source term first so overlapping terms resolve predictably.
pub fn merge_terms(
    global: &[GlossaryTerm],
    project: &[GlossaryTerm],
    target_locale: &str,
) -> Vec<GlossaryTerm> {
    let mut merged: BTreeMap<String, GlossaryTerm> = BTreeMap::new();
    for term in global.iter().chain(project.iter()) {
        if !term.is_enforced() || !term.target_locale.eq_ignore_ascii_case(target_locale) {
            continue;
        }
        merged.insert(term.source_term.clone(), term.clone());
    }

    let mut terms: Vec<GlossaryTerm> = merged.into_values().collect();
    terms.sort_by(|a, b| {
        b.source_term
            .chars()
            .count()
            .cmp(&a.source_term.chars().count())
            .then_with(|| a.source_term.cmp(&b.source_term))
    });
    terms
}
