//! Optional second opinion for ambiguous source changes
//!
//! The deterministic ladder in [`loctable::classify`] always runs first. Only
//! its ambiguous `FLAG` result is handed to an escalation, and any escalation
//! failure falls back to that `FLAG`.

use std::sync::Arc;

use async_trait::async_trait;
use loctable::{ChangeClassification, ChangeDecision, ChangeRule, classify};
use serde::Deserialize;

use crate::error::{MtError, MtResult};
use crate::generator::{GenerationRequest, Generator};

/// A source revision of one row, seen from one target locale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeQuery<'a> {
    pub old_text: &'a str,
    pub new_text: &'a str,
    pub source_locale: &'a str,
    pub target_locale: &'a str,
}

/// Capability that resolves an ambiguous change to a decision
#[async_trait]
pub trait ChangeEscalation: Send + Sync {
    async fn resolve(&self, query: &ChangeQuery<'_>) -> MtResult<ChangeClassification>;
}

/// Escalation that asks a [`Generator`] for a JSON verdict
pub struct GeneratorEscalation {
    generator: Arc<dyn Generator>,
}

impl GeneratorEscalation {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        GeneratorEscalation { generator }
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    decision: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// Parse a verdict, tolerating prose or code fences around the JSON object
pub fn parse_verdict(answer: &str) -> MtResult<ChangeClassification> {
    let json = match (answer.find('{'), answer.rfind('}')) {
        (Some(start), Some(end)) if start < end => &answer[start..=end],
        _ => {
            return Err(MtError::Translation(format!(
                "Change resolver answer has no JSON object: {answer}"
            )));
        }
    };
    let verdict: Verdict = serde_json::from_str(json)?;
    let decision = ChangeDecision::parse(&verdict.decision).ok_or_else(|| {
        MtError::Translation(format!("Unknown change decision '{}'", verdict.decision))
    })?;
    Ok(ChangeClassification {
        decision,
        confidence: verdict.confidence.clamp(0.0, 1.0),
        reason: if verdict.reason.trim().is_empty() {
            "Resolved by escalation".to_string()
        } else {
            verdict.reason
        },
        rule: ChangeRule::Escalated,
    })
}

#[async_trait]
impl ChangeEscalation for GeneratorEscalation {
    async fn resolve(&self, query: &ChangeQuery<'_>) -> MtResult<ChangeClassification> {
        let request = GenerationRequest::resolve_change(
            query.old_text,
            query.new_text,
            query.source_locale,
            query.target_locale,
        );
        let answer = self.generator.generate(&request).await?;
        parse_verdict(&answer)
    }
}

/// Classify a change, escalating an ambiguous `FLAG` when a capability is given
pub async fn classify_with_escalation(
    query: &ChangeQuery<'_>,
    escalation: Option<&dyn ChangeEscalation>,
) -> ChangeClassification {
    let deterministic = classify(query.old_text, query.new_text);
    let Some(escalation) = escalation else {
        return deterministic;
    };
    if !deterministic.is_escalatable() {
        return deterministic;
    }
    match escalation.resolve(query).await {
        Ok(resolved) => {
            tracing::debug!(
                decision = %resolved.decision,
                confidence = resolved.confidence,
                target_locale = %query.target_locale,
                "Escalated ambiguous change"
            );
            resolved
        }
        Err(e) => {
            tracing::warn!(error = %e, "Change escalation failed, keeping FLAG");
            deterministic
        }
    }
}
