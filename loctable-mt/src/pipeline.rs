//! Pipeline orchestration: one candidate per (segment, target locale)
//!
//! ```text
//! source ─ protect ─ enforce ─┬─ memory exact / fuzzy ───────────────┐
//!                             └─ generate ─ (review if risky) ─ restore ─ reinject ─┴─ QA ─ store
//! ```
//!
//! Memory lookups always use the original source text. Generator failures
//! leave the row `PENDING`; token and term problems are recorded as flags and
//! never stop a batch.

use std::sync::Arc;

use async_trait::async_trait;
use loctable::qa::{check_char_limit, check_glossary_compliance, check_newlines, check_placeholders};
use loctable::{
    CandidateOrigin, ChangeClassification, ChangeDecision, ExpectedEnforcement, Glossary,
    GuardError, IssueKind, ProtectedText, QaIssue, Segment, enforce, protect, restore,
};
use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::error::{MtError, MtResult};
use crate::escalation::{ChangeEscalation, ChangeQuery, classify_with_escalation};
use crate::generator::{GenerationRequest, GenerationTask, Generator, validate_locale};
use crate::memory::{MemoryScope, NewCandidate, RowOutcome, Store, StoredChangeDecision, source_hash};
use crate::state::{RowState, StateTrail};

/// Shared cancellation flag for a running batch
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        CancelToken {
            sender: Arc::new(sender),
        }
    }

    /// Stop issuing new generator calls. Committed rows stay committed.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowDisposition {
    /// Candidate and flags committed, row `DONE`
    Done,
    /// Already `DONE` for this source, or nothing to do
    Skipped,
    /// Stopped before any write
    Cancelled,
}

/// Result of processing one (segment, target locale) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowReport {
    pub segment_id: String,
    pub target_locale: String,
    pub disposition: RowDisposition,
    pub candidate_id: Option<String>,
    pub text: Option<String>,
    pub origin: Option<CandidateOrigin>,
    pub issues: Vec<QaIssue>,
    pub risk_score: Option<u32>,
    pub states: Vec<RowState>,
    /// Set by change-impact runs
    pub change: Option<ChangeClassification>,
}

impl RowReport {
    fn empty(segment_id: &str, target_locale: &str, disposition: RowDisposition) -> Self {
        RowReport {
            segment_id: segment_id.to_string(),
            target_locale: target_locale.to_string(),
            disposition,
            candidate_id: None,
            text: None,
            origin: None,
            issues: Vec::new(),
            risk_score: None,
            states: Vec::new(),
            change: None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        !self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    pub segment_id: String,
    pub target_locale: String,
    pub error: String,
}

/// Summary of a batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Processed rows that carry at least one flag
    pub flagged: usize,
    pub cancelled: usize,
    pub rows: Vec<RowReport>,
    pub failures: Vec<RowFailure>,
}

impl BatchReport {
    fn record(&mut self, result: Result<RowReport, RowFailure>) {
        match result {
            Ok(row) => {
                match row.disposition {
                    RowDisposition::Done => {
                        self.processed += 1;
                        if row.is_flagged() {
                            self.flagged += 1;
                        }
                    }
                    RowDisposition::Skipped => self.skipped += 1,
                    RowDisposition::Cancelled => self.cancelled += 1,
                }
                self.rows.push(row);
            }
            Err(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }

    fn sort(&mut self) {
        self.rows.sort_by(|a, b| {
            (a.segment_id.as_str(), a.target_locale.as_str())
                .cmp(&(b.segment_id.as_str(), b.target_locale.as_str()))
        });
        self.failures.sort_by(|a, b| {
            (a.segment_id.as_str(), a.target_locale.as_str())
                .cmp(&(b.segment_id.as_str(), b.target_locale.as_str()))
        });
    }
}

/// Risk of a generated translation going wrong, used to gate the review pass.
///
/// * char limit present: +3
/// * format placeholders present: +2
/// * markup tags present: +2
/// * more than one glossary hit: +1
/// * source shorter than 12 characters: +2
pub fn risk_score(segment: &Segment, protected: &ProtectedText, glossary_hits: usize) -> u32 {
    let mut score = 0;
    if segment.char_limit.is_some() {
        score += 3;
    }
    if protected.has_placeholders() {
        score += 2;
    }
    if protected.has_tags() {
        score += 2;
    }
    if glossary_hits > 1 {
        score += 1;
    }
    if segment.source_text.chars().count() < 12 {
        score += 2;
    }
    score
}

/// Candidate text and provenance before QA
struct Draft {
    text: String,
    origin: CandidateOrigin,
    memory_entry_id: Option<String>,
    score: Option<f64>,
    /// Generator output with markers, when generation ran
    raw: Option<String>,
    issues: Vec<QaIssue>,
    risk_score: Option<u32>,
}

/// Runs segments through memory, generation and QA against one store
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<Store>,
    generator: Arc<dyn Generator>,
    config: Arc<PipelineConfig>,
    glossary: Arc<Glossary>,
    escalation: Option<Arc<dyn ChangeEscalation>>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(store: Arc<Store>, generator: Arc<dyn Generator>, config: PipelineConfig) -> Self {
        Pipeline {
            store,
            generator,
            config: Arc::new(config),
            glossary: Arc::new(Glossary::default()),
            escalation: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_glossary(mut self, glossary: Glossary) -> Self {
        self.glossary = Arc::new(glossary);
        self
    }

    /// Escalate ambiguous change decisions through `escalation`
    pub fn with_escalation(mut self, escalation: Arc<dyn ChangeEscalation>) -> Self {
        self.escalation = Some(escalation);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle that stops this pipeline (and its clones) from issuing new calls
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Process one pair. A generator failure marks the row `PENDING` and is
    /// returned as the error.
    pub async fn run_segment(&self, segment: &Segment, target_locale: &str) -> MtResult<RowReport> {
        if self.cancel.is_cancelled() {
            return Ok(RowReport::empty(&segment.id, target_locale, RowDisposition::Cancelled));
        }
        let target_locale = validate_locale(target_locale)?;
        let hash = source_hash(&segment.source_text);

        if let Some(status) = self.store.row_state(&segment.id, &target_locale).await?
            && status.state == RowState::Done
            && status.source_hash == hash
        {
            tracing::debug!(segment_id = %segment.id, target_locale = %target_locale, "Row already done");
            return Ok(RowReport::empty(&segment.id, &target_locale, RowDisposition::Skipped));
        }

        self.translate_row(segment, &target_locale, &hash, None, Vec::new())
            .await
    }

    /// Process every (segment, target locale) pair on a bounded worker pool
    pub async fn run_batch(&self, segments: &[Segment], target_locales: &[String]) -> BatchReport {
        let report = self
            .spawn_rows(segments, target_locales, |pipeline, segment, locale| async move {
                pipeline.run_segment(&segment, &locale).await
            })
            .await;
        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            flagged = report.flagged,
            cancelled = report.cancelled,
            "Batch finished"
        );
        report
    }

    /// Classify source revisions and propose new translations where needed.
    ///
    /// Only segments whose prior source differs from the current one are
    /// considered. KEEP writes no candidate; UPDATE and FLAG store a
    /// `change-proposal` candidate.
    pub async fn run_change_batch(
        &self,
        segments: &[Segment],
        target_locales: &[String],
    ) -> BatchReport {
        let report = self
            .spawn_rows(segments, target_locales, |pipeline, segment, locale| async move {
                pipeline.run_change_segment(&segment, &locale).await
            })
            .await;
        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            flagged = report.flagged,
            cancelled = report.cancelled,
            "Change batch finished"
        );
        report
    }

    /// Change-impact processing of one pair
    pub async fn run_change_segment(
        &self,
        segment: &Segment,
        target_locale: &str,
    ) -> MtResult<RowReport> {
        if self.cancel.is_cancelled() {
            return Ok(RowReport::empty(&segment.id, target_locale, RowDisposition::Cancelled));
        }
        let target_locale = validate_locale(target_locale)?;
        let Some(old_text) = segment
            .prior_source_text
            .as_deref()
            .filter(|prior| *prior != segment.source_text)
        else {
            return Ok(RowReport::empty(&segment.id, &target_locale, RowDisposition::Skipped));
        };

        if let Some(stored) = self.store.change_decision(&segment.id, &target_locale).await?
            && stored.old_source == old_text
            && stored.new_source == segment.source_text
        {
            let mut report = RowReport::empty(&segment.id, &target_locale, RowDisposition::Skipped);
            report.change = Some(stored.classification);
            return Ok(report);
        }

        let query = ChangeQuery {
            old_text,
            new_text: &segment.source_text,
            source_locale: &segment.source_locale,
            target_locale: &target_locale,
        };
        let bounded = self
            .escalation
            .as_deref()
            .map(|inner| BoundedEscalation { inner, pipeline: self });
        let classification = classify_with_escalation(
            &query,
            bounded.as_ref().map(|b| b as &dyn ChangeEscalation),
        )
        .await;
        if self.cancel.is_cancelled() {
            return Ok(RowReport::empty(&segment.id, &target_locale, RowDisposition::Cancelled));
        }
        tracing::info!(
            segment_id = %segment.id,
            target_locale = %target_locale,
            decision = %classification.decision,
            rule = classification.rule.as_str(),
            "Classified source change"
        );

        let mut issues = vec![
            QaIssue::warn(
                IssueKind::StaleSource,
                "Source text changed since the last translation",
            )
            .with_detail("old_source", old_text)
            .with_detail("decision", classification.decision.as_str()),
        ];
        if classification.decision == ChangeDecision::Flag {
            issues.push(
                QaIssue::warn(IssueKind::AmbiguousChange, classification.reason.clone())
                    .with_detail("rule", classification.rule.as_str()),
            );
        }

        let hash = source_hash(&segment.source_text);
        let mut report = if classification.decision.needs_candidate() {
            self.translate_row(
                segment,
                &target_locale,
                &hash,
                Some(CandidateOrigin::ChangeProposal),
                issues,
            )
            .await?
        } else {
            let outcome = RowOutcome {
                segment_id: segment.id.clone(),
                target_locale: target_locale.clone(),
                source_hash: hash,
                candidate: None,
                issues: issues.clone(),
                state: RowState::Done,
            };
            self.store.record_outcome(&outcome).await?;
            let mut report = RowReport::empty(&segment.id, &target_locale, RowDisposition::Done);
            report.issues = issues;
            report
        };

        if report.disposition == RowDisposition::Done {
            self.store
                .record_change_decision(&StoredChangeDecision {
                    segment_id: segment.id.clone(),
                    target_locale: target_locale.clone(),
                    classification: classification.clone(),
                    old_source: old_text.to_string(),
                    new_source: segment.source_text.clone(),
                    candidate_id: report.candidate_id.clone(),
                    decided_at: crate::memory::now_millis(),
                })
                .await?;
        }
        report.change = Some(classification);
        Ok(report)
    }

    async fn spawn_rows<F, Fut>(
        &self,
        segments: &[Segment],
        target_locales: &[String],
        run: F,
    ) -> BatchReport
    where
        F: Fn(Pipeline, Segment, String) -> Fut,
        Fut: Future<Output = MtResult<RowReport>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.batch_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for segment in segments {
            for locale in target_locales {
                let semaphore = semaphore.clone();
                let cancel = self.cancel.clone();
                let segment_id = segment.id.clone();
                let target_locale = locale.clone();
                let row = run(self.clone(), segment.clone(), locale.clone());
                tasks.spawn(async move {
                    let permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit.ok(),
                        _ = cancel.cancelled() => None,
                    };
                    if permit.is_none() {
                        return Ok(RowReport::empty(
                            &segment_id,
                            &target_locale,
                            RowDisposition::Cancelled,
                        ));
                    }
                    row.await.map_err(|e| RowFailure {
                        segment_id,
                        target_locale,
                        error: e.to_string(),
                    })
                });
            }
        }

        let mut report = BatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.record(result),
                Err(e) => {
                    tracing::error!(error = %e, "Pipeline task panicked");
                    report.failed += 1;
                }
            }
        }
        report.sort();
        report
    }

    /// Memory lookup, generation and QA for one pair, then one commit
    async fn translate_row(
        &self,
        segment: &Segment,
        target_locale: &str,
        hash: &str,
        origin_override: Option<CandidateOrigin>,
        extra_issues: Vec<QaIssue>,
    ) -> MtResult<RowReport> {
        match self.build_draft(segment, target_locale).await {
            Ok(Some((draft, trail, expected))) => {
                self.finish_row(
                    segment,
                    target_locale,
                    hash,
                    origin_override,
                    extra_issues,
                    draft,
                    trail,
                    expected,
                )
                .await
            }
            Ok(None) | Err(MtError::Cancelled) => {
                Ok(RowReport::empty(&segment.id, target_locale, RowDisposition::Cancelled))
            }
            Err(e) => {
                tracing::warn!(
                    segment_id = %segment.id,
                    target_locale = %target_locale,
                    error = %e,
                    "Row left pending"
                );
                if let Err(store_err) = self
                    .store
                    .mark_pending(&segment.id, target_locale, hash, &e.to_string())
                    .await
                {
                    tracing::error!(error = %store_err, "Could not mark row pending");
                }
                Err(e)
            }
        }
    }

    /// Produce the candidate text. `None` means cancelled before generation.
    async fn build_draft(
        &self,
        segment: &Segment,
        target_locale: &str,
    ) -> MtResult<Option<(Draft, StateTrail, Vec<ExpectedEnforcement>)>> {
        if segment.source_text.trim().is_empty() {
            return Err(GuardError::EmptySource(segment.id.clone()).into());
        }
        let source_locale = validate_locale(&segment.source_locale)?;
        let scope = MemoryScope::new(&self.config.project_id, &source_locale, target_locale);
        let terms = self
            .glossary
            .effective_terms(target_locale, self.config.include_global_glossary);

        let mut trail = StateTrail::new();
        let protected = protect(&segment.source_text);
        let enforced = enforce(&protected.protected, &terms);
        let expected = enforced.expected().to_vec();

        trail.advance(RowState::MemoryChecked);
        if let Some(draft) = self.memory_draft(&scope, &segment.source_text).await? {
            trail.advance(RowState::MemoryHit);
            tracing::debug!(
                segment_id = %segment.id,
                target_locale = %target_locale,
                origin = %draft.origin,
                "Memory hit"
            );
            return Ok(Some((draft, trail, expected)));
        }

        trail.advance(RowState::GenerationNeeded);
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let context = (!segment.context.is_empty()).then_some(&segment.context);
        let request = GenerationRequest::translate(
            &segment.source_text,
            &enforced.enforced,
            &source_locale,
            target_locale,
            &self.config.style_hints,
            context,
        );
        let mut raw = self.call_generator(&request).await?;
        trail.advance(RowState::Generated);

        let risk = risk_score(segment, &protected, enforced.map.len());
        let origin = if risk >= self.config.review_risk_threshold {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let review = GenerationRequest::review(
                &segment.source_text,
                &enforced.enforced,
                &raw,
                &source_locale,
                target_locale,
                &self.config.style_hints,
            );
            raw = self.call_generator(&review).await?;
            trail.advance(RowState::Reviewed);
            CandidateOrigin::GeneratedReviewed
        } else {
            trail.advance(RowState::SkippedReview);
            CandidateOrigin::Generated
        };

        let restored = restore(&raw, &enforced.map);
        let mut issues = restored.issues;
        let text = match protected.reinject(&restored.text) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(segment_id = %segment.id, error = %e, "Placeholder reinjection failed");
                issues.push(QaIssue::error(IssueKind::TokenMismatch, e.to_string()));
                protected.reinject_lossy(&restored.text)
            }
        };

        Ok(Some((
            Draft {
                text,
                origin,
                memory_entry_id: None,
                score: None,
                raw: Some(raw),
                issues,
                risk_score: Some(risk),
            },
            trail,
            expected,
        )))
    }

    async fn memory_draft(&self, scope: &MemoryScope, source_text: &str) -> MtResult<Option<Draft>> {
        let (entry, origin, score) = match self.store.find_exact(scope, source_text).await? {
            Some(entry) => (entry, CandidateOrigin::MemoryExact, None),
            None => {
                let best = self
                    .store
                    .search_fuzzy(scope, source_text, self.config.fuzzy_candidate_cap)
                    .await?
                    .into_iter()
                    .next()
                    .filter(|hit| hit.score >= self.config.fuzzy_threshold);
                match best {
                    Some(hit) => (hit.entry, CandidateOrigin::MemoryFuzzy, Some(hit.score)),
                    None => return Ok(None),
                }
            }
        };
        self.store.record_use(&entry.id).await?;
        Ok(Some(Draft {
            text: entry.target_text,
            origin,
            memory_entry_id: Some(entry.id),
            score,
            raw: None,
            issues: Vec::new(),
            risk_score: None,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_row(
        &self,
        segment: &Segment,
        target_locale: &str,
        hash: &str,
        origin_override: Option<CandidateOrigin>,
        extra_issues: Vec<QaIssue>,
        draft: Draft,
        mut trail: StateTrail,
        expected: Vec<ExpectedEnforcement>,
    ) -> MtResult<RowReport> {
        let mut issues = extra_issues;
        issues.extend(draft.issues);
        issues.extend(check_placeholders(&segment.source_text, &draft.text));
        issues.extend(check_newlines(&segment.source_text, &draft.text));
        issues.extend(check_glossary_compliance(&expected, &draft.text, draft.raw.as_deref()));
        issues.extend(check_char_limit(&draft.text, segment.char_limit));
        trail.advance(RowState::QaChecked);
        trail.advance(RowState::Done);

        let origin = origin_override.unwrap_or(draft.origin);
        let candidate = NewCandidate {
            segment_id: segment.id.clone(),
            target_locale: target_locale.to_string(),
            text: draft.text.clone(),
            origin,
            memory_entry_id: draft.memory_entry_id,
            score: draft.score,
        };
        let outcome = RowOutcome {
            segment_id: segment.id.clone(),
            target_locale: target_locale.to_string(),
            source_hash: hash.to_string(),
            candidate: Some(candidate),
            issues: issues.clone(),
            state: RowState::Done,
        };
        let candidate_id = self.store.record_outcome(&outcome).await?;

        if !issues.is_empty() {
            tracing::info!(
                segment_id = %segment.id,
                target_locale = %target_locale,
                flags = issues.len(),
                "Candidate flagged"
            );
        }

        Ok(RowReport {
            segment_id: segment.id.clone(),
            target_locale: target_locale.to_string(),
            disposition: RowDisposition::Done,
            candidate_id,
            text: Some(draft.text),
            origin: Some(origin),
            issues,
            risk_score: draft.risk_score,
            states: trail.states().to_vec(),
            change: None,
        })
    }

    /// One generator call with a timeout, retried on transient failure
    async fn call_generator(&self, request: &GenerationRequest) -> MtResult<String> {
        let text = self
            .bounded(request.task.as_str(), || self.generator.generate(request))
            .await?;
        if text.trim().is_empty() {
            return Err(MtError::Translation(format!(
                "{} returned an empty {} answer",
                self.generator.provider_name(),
                request.task.as_str()
            )));
        }
        Ok(text)
    }

    /// Run an external call under the generator timeout, retrying transient
    /// failures. No attempt starts once the pipeline is cancelled.
    async fn bounded<T, F, Fut>(&self, task: &str, mut call: F) -> MtResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MtResult<T>>,
    {
        let attempts = self.config.generator_retries + 1;
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(MtError::Cancelled);
            }
            attempt += 1;
            let result = match tokio::time::timeout(self.config.generator_timeout(), call()).await {
                Ok(result) => result,
                Err(_) => Err(MtError::GeneratorTimeout(self.config.generator_timeout_secs)),
            };
            match result {
                Err(e) if e.is_transient() && attempt < attempts && !self.cancel.is_cancelled() => {
                    tracing::warn!(
                        provider = self.generator.provider_name(),
                        task,
                        attempt,
                        error = %e,
                        "Retrying generator call"
                    );
                }
                other => return other,
            }
        }
    }
}

/// Change escalation held to the pipeline's timeout, retry and cancel policy
struct BoundedEscalation<'a> {
    inner: &'a dyn ChangeEscalation,
    pipeline: &'a Pipeline,
}

#[async_trait]
impl<'a> ChangeEscalation for BoundedEscalation<'a> {
    async fn resolve(&self, query: &ChangeQuery<'_>) -> MtResult<ChangeClassification> {
        self.pipeline
            .bounded(GenerationTask::ResolveChange.as_str(), || self.inner.resolve(query))
            .await
    }
}
