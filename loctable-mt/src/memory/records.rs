//! Candidates, approvals, QA flags, row status and change decisions

use std::collections::BTreeMap;

use loctable::{
    CandidateOrigin, ChangeClassification, ChangeDecision, ChangeRule, IssueKind, QaIssue,
    Severity,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::tm::{MemoryScope, upsert_entry};
use super::{Store, now_millis};
use crate::error::{MtError, MtResult};
use crate::state::RowState;

/// A candidate about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewCandidate {
    pub segment_id: String,
    pub target_locale: String,
    pub text: String,
    pub origin: CandidateOrigin,
    pub memory_entry_id: Option<String>,
    /// Fuzzy similarity, when the candidate came from memory
    pub score: Option<f64>,
}

impl NewCandidate {
    pub fn new(segment_id: &str, target_locale: &str, text: &str, origin: CandidateOrigin) -> Self {
        NewCandidate {
            segment_id: segment_id.to_string(),
            target_locale: target_locale.to_string(),
            text: text.to_string(),
            origin,
            memory_entry_id: None,
            score: None,
        }
    }
}

/// A stored, immutable translation candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationCandidate {
    pub id: String,
    pub segment_id: String,
    pub target_locale: String,
    pub text: String,
    pub origin: CandidateOrigin,
    pub memory_entry_id: Option<String>,
    pub score: Option<f64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedTranslation {
    pub segment_id: String,
    pub target_locale: String,
    pub final_text: String,
    pub candidate_id: Option<String>,
    pub memory_entry_id: Option<String>,
    pub pinned: bool,
    pub approved_by: Option<String>,
    pub approved_at: i64,
}

/// Human approval handed in by the review collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub scope: MemoryScope,
    pub segment_id: String,
    pub source_text: String,
    pub final_text: String,
    pub candidate_id: Option<String>,
    pub approved_by: Option<String>,
    pub pin: bool,
    /// Required to replace a pinned approval with different text
    pub overwrite_pinned: bool,
}

impl ApprovalRequest {
    pub fn new(scope: MemoryScope, segment_id: &str, source_text: &str, final_text: &str) -> Self {
        ApprovalRequest {
            scope,
            segment_id: segment_id.to_string(),
            source_text: source_text.to_string(),
            final_text: final_text.to_string(),
            candidate_id: None,
            approved_by: None,
            pin: false,
            overwrite_pinned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowStatus {
    pub state: RowState,
    pub source_hash: String,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChangeDecision {
    pub segment_id: String,
    pub target_locale: String,
    pub classification: ChangeClassification,
    pub old_source: String,
    pub new_source: String,
    pub candidate_id: Option<String>,
    pub decided_at: i64,
}

/// Everything one pipeline row writes, committed together
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub segment_id: String,
    pub target_locale: String,
    pub source_hash: String,
    pub candidate: Option<NewCandidate>,
    /// Replaces every flag of the pair
    pub issues: Vec<QaIssue>,
    pub state: RowState,
}

const CANDIDATE_COLUMNS: &str =
    "id, segment_id, target_locale, text, origin, memory_entry_id, score, created_at";

fn candidate_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TranslationCandidate> {
    let origin: String = r.get(4)?;
    Ok(TranslationCandidate {
        id: r.get(0)?,
        segment_id: r.get(1)?,
        target_locale: r.get(2)?,
        text: r.get(3)?,
        origin: CandidateOrigin::parse(&origin).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown candidate origin '{origin}'").into(),
            )
        })?,
        memory_entry_id: r.get(5)?,
        score: r.get(6)?,
        created_at: r.get(7)?,
    })
}

fn insert_candidate_row(conn: &Connection, candidate: &NewCandidate) -> rusqlite::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO candidates (id, segment_id, target_locale, text, origin, memory_entry_id,
                                 score, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &candidate.segment_id,
            &candidate.target_locale,
            &candidate.text,
            candidate.origin.as_str(),
            &candidate.memory_entry_id,
            candidate.score,
            now_millis(),
        ],
    )?;
    Ok(id)
}

fn replace_flag_rows(
    conn: &Connection,
    segment_id: &str,
    target_locale: &str,
    issues: &[QaIssue],
) -> MtResult<()> {
    conn.execute(
        "DELETE FROM qa_flags WHERE segment_id = ?1 AND target_locale = ?2",
        params![segment_id, target_locale],
    )?;
    let now = now_millis();
    for issue in issues {
        conn.execute(
            "INSERT INTO qa_flags (id, segment_id, target_locale, kind, severity, message, detail,
                                   created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid::Uuid::new_v4().to_string(),
                segment_id,
                target_locale,
                issue.kind.as_str(),
                issue.severity.as_str(),
                &issue.message,
                serde_json::to_string(&issue.detail)?,
                now,
            ],
        )?;
    }
    Ok(())
}

fn set_row_state(
    conn: &Connection,
    segment_id: &str,
    target_locale: &str,
    state: RowState,
    source_hash: &str,
    last_error: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO row_status (segment_id, target_locale, state, source_hash, last_error,
                                 updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(segment_id, target_locale)
         DO UPDATE SET state = excluded.state,
                       source_hash = excluded.source_hash,
                       last_error = excluded.last_error,
                       updated_at = excluded.updated_at",
        params![
            segment_id,
            target_locale,
            state.as_str(),
            source_hash,
            last_error,
            now_millis()
        ],
    )?;
    Ok(())
}

fn candidate_by_id(
    conn: &Connection,
    candidate_id: &str,
) -> rusqlite::Result<Option<TranslationCandidate>> {
    conn.query_row(
        &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = ?1"),
        params![candidate_id],
        candidate_from_row,
    )
    .optional()
}

fn approved_row(
    conn: &Connection,
    segment_id: &str,
    target_locale: &str,
) -> rusqlite::Result<Option<ApprovedTranslation>> {
    conn.query_row(
        "SELECT segment_id, target_locale, final_text, candidate_id, memory_entry_id,
                pinned, approved_by, approved_at
         FROM approved_translations
         WHERE segment_id = ?1 AND target_locale = ?2",
        params![segment_id, target_locale],
        |r| {
            Ok(ApprovedTranslation {
                segment_id: r.get(0)?,
                target_locale: r.get(1)?,
                final_text: r.get(2)?,
                candidate_id: r.get(3)?,
                memory_entry_id: r.get(4)?,
                pinned: r.get(5)?,
                approved_by: r.get(6)?,
                approved_at: r.get(7)?,
            })
        },
    )
    .optional()
}

fn approve_in(conn: &mut Connection, request: &ApprovalRequest) -> MtResult<String> {
    let target_locale = &request.scope.target_locale;
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let existing: Option<(String, bool)> = tx
        .query_row(
            "SELECT final_text, pinned FROM approved_translations
             WHERE segment_id = ?1 AND target_locale = ?2",
            params![&request.segment_id, target_locale],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some((text, true)) = &existing
        && *text != request.final_text
        && !request.overwrite_pinned
    {
        return Err(MtError::PinnedTranslation {
            segment_id: request.segment_id.clone(),
            locale: target_locale.clone(),
        });
    }
    let pinned =
        request.pin || existing.as_ref().is_some_and(|(_, p)| *p && !request.overwrite_pinned);

    let provenance = request.candidate_id.as_deref().unwrap_or(&request.segment_id);
    let entry_id = upsert_entry(
        &tx,
        &request.scope,
        &request.source_text,
        &request.final_text,
        Some(provenance),
    )?;

    tx.execute(
        "INSERT INTO approved_translations (segment_id, target_locale, final_text, candidate_id,
                                            memory_entry_id, pinned, approved_by, approved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(segment_id, target_locale)
         DO UPDATE SET final_text = excluded.final_text,
                       candidate_id = excluded.candidate_id,
                       memory_entry_id = excluded.memory_entry_id,
                       pinned = excluded.pinned,
                       approved_by = excluded.approved_by,
                       approved_at = excluded.approved_at",
        params![
            &request.segment_id,
            target_locale,
            &request.final_text,
            &request.candidate_id,
            &entry_id,
            pinned,
            &request.approved_by,
            now_millis(),
        ],
    )?;
    tx.commit()?;

    tracing::info!(
        segment_id = %request.segment_id,
        target_locale = %target_locale,
        pinned,
        "Approved translation"
    );
    Ok(entry_id)
}

fn record_outcome_in(conn: &mut Connection, outcome: &RowOutcome) -> MtResult<Option<String>> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let candidate_id = outcome
        .candidate
        .as_ref()
        .map(|c| insert_candidate_row(&tx, c))
        .transpose()?;
    replace_flag_rows(&tx, &outcome.segment_id, &outcome.target_locale, &outcome.issues)?;
    set_row_state(
        &tx,
        &outcome.segment_id,
        &outcome.target_locale,
        outcome.state,
        &outcome.source_hash,
        None,
    )?;
    tx.commit()?;
    Ok(candidate_id)
}

fn flag_from_columns(kind: String, severity: String, message: String, detail: String) -> MtResult<QaIssue> {
    let kind = IssueKind::parse(&kind)
        .ok_or_else(|| MtError::Translation(format!("Unknown flag kind '{kind}'")))?;
    let severity = Severity::parse(&severity)
        .ok_or_else(|| MtError::Translation(format!("Unknown flag severity '{severity}'")))?;
    let detail: BTreeMap<String, String> = serde_json::from_str(&detail)?;
    Ok(QaIssue {
        kind,
        severity,
        message,
        detail,
    })
}

impl Store {
    pub async fn insert_candidate(&self, candidate: &NewCandidate) -> MtResult<String> {
        let candidate = candidate.clone();
        self.call(move |db| {
            let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let id = insert_candidate_row(&tx, &candidate)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    /// Insert many candidates in one transaction, e.g. a baseline import
    pub async fn insert_candidates(&self, candidates: &[NewCandidate]) -> MtResult<Vec<String>> {
        let candidates = candidates.to_vec();
        let ids = self
            .call(move |db| {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let ids = candidates
                    .iter()
                    .map(|c| insert_candidate_row(&tx, c))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                tx.commit()?;
                Ok(ids)
            })
            .await?;
        tracing::debug!(count = ids.len(), "Inserted candidates");
        Ok(ids)
    }

    /// All candidates for a pair, oldest first
    pub async fn candidates_for(
        &self,
        segment_id: &str,
        target_locale: &str,
    ) -> MtResult<Vec<TranslationCandidate>> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        self.call(move |db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {CANDIDATE_COLUMNS} FROM candidates
                 WHERE segment_id = ?1 AND target_locale = ?2
                 ORDER BY created_at, rowid"
            ))?;
            let rows = stmt
                .query_map(params![&segment_id, &target_locale], candidate_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn candidate(&self, candidate_id: &str) -> MtResult<Option<TranslationCandidate>> {
        let candidate_id = candidate_id.to_string();
        self.call(move |db| Ok(candidate_by_id(db, &candidate_id)?))
            .await
    }

    /// The approved candidate when an approval references one, otherwise the
    /// latest candidate by creation time
    pub async fn current_candidate(
        &self,
        segment_id: &str,
        target_locale: &str,
    ) -> MtResult<Option<TranslationCandidate>> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        self.call(move |db| {
            if let Some(approved) = approved_row(db, &segment_id, &target_locale)?
                && let Some(candidate_id) = approved.candidate_id
                && let Some(candidate) = candidate_by_id(db, &candidate_id)?
            {
                return Ok(Some(candidate));
            }
            let candidate = db
                .query_row(
                    &format!(
                        "SELECT {CANDIDATE_COLUMNS} FROM candidates
                         WHERE segment_id = ?1 AND target_locale = ?2
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT 1"
                    ),
                    params![&segment_id, &target_locale],
                    candidate_from_row,
                )
                .optional()?;
            Ok(candidate)
        })
        .await
    }

    /// Write the approved translation and learn it into memory, atomically.
    ///
    /// Returns the memory entry id.
    pub async fn approve(&self, request: &ApprovalRequest) -> MtResult<String> {
        let request = request.clone();
        self.call(move |db| approve_in(db, &request)).await
    }

    pub async fn approved_translation(
        &self,
        segment_id: &str,
        target_locale: &str,
    ) -> MtResult<Option<ApprovedTranslation>> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        self.call(move |db| Ok(approved_row(db, &segment_id, &target_locale)?))
            .await
    }

    /// Supersede every flag of the pair with `issues`
    pub async fn replace_flags(
        &self,
        segment_id: &str,
        target_locale: &str,
        issues: &[QaIssue],
    ) -> MtResult<()> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        let issues = issues.to_vec();
        self.call(move |db| {
            let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            replace_flag_rows(&tx, &segment_id, &target_locale, &issues)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn flags_for(&self, segment_id: &str, target_locale: &str) -> MtResult<Vec<QaIssue>> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        let rows = self
            .call(move |db| {
                let mut stmt = db.prepare(
                    "SELECT kind, severity, message, detail FROM qa_flags
                     WHERE segment_id = ?1 AND target_locale = ?2
                     ORDER BY created_at, rowid",
                )?;
                let rows = stmt
                    .query_map(params![&segment_id, &target_locale], |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(kind, severity, message, detail)| {
                flag_from_columns(kind, severity, message, detail)
            })
            .collect()
    }

    /// True when the pair has no `error` flag
    pub async fn is_ready_to_approve(&self, segment_id: &str, target_locale: &str) -> MtResult<bool> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        self.call(move |db| {
            let errors: i64 = db.query_row(
                "SELECT COUNT(*) FROM qa_flags
                 WHERE segment_id = ?1 AND target_locale = ?2 AND severity = 'error'",
                params![&segment_id, &target_locale],
                |r| r.get(0),
            )?;
            Ok(errors == 0)
        })
        .await
    }

    pub async fn row_state(
        &self,
        segment_id: &str,
        target_locale: &str,
    ) -> MtResult<Option<RowStatus>> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        let row = self
            .call(move |db| {
                let row = db
                    .query_row(
                        "SELECT state, source_hash, last_error, updated_at FROM row_status
                         WHERE segment_id = ?1 AND target_locale = ?2",
                        params![&segment_id, &target_locale],
                        |r| {
                            Ok((
                                r.get::<_, String>(0)?,
                                r.get::<_, String>(1)?,
                                r.get::<_, Option<String>>(2)?,
                                r.get::<_, i64>(3)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row.map(|(state, source_hash, last_error, updated_at)| RowStatus {
            state: RowState::parse(&state).unwrap_or(RowState::Pending),
            source_hash,
            last_error,
            updated_at,
        }))
    }

    /// Mark a pair `PENDING` after a failure, keeping any earlier candidate
    pub async fn mark_pending(
        &self,
        segment_id: &str,
        target_locale: &str,
        source_hash: &str,
        error: &str,
    ) -> MtResult<()> {
        let (segment_id, target_locale) = (segment_id.to_string(), target_locale.to_string());
        let (source_hash, error) = (source_hash.to_string(), error.to_string());
        self.call(move |db| {
            let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            set_row_state(
                &tx,
                &segment_id,
                &target_locale,
                RowState::Pending,
                &source_hash,
                Some(&error),
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Commit one row's candidate, flags and state together.
    ///
    /// Returns the new candidate id, if a candidate was written.
    pub async fn record_outcome(&self, outcome: &RowOutcome) -> MtResult<Option<String>> {
        let outcome = outcome.clone();
        self.call(move |db| record_outcome_in(db, &outcome)).await
    }

    pub async fn record_change_decision(&self, decision: &StoredChangeDecision) -> MtResult<()> {
        let decision = decision.clone();
        self.call(move |db| {
            let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO change_decisions (segment_id, target_locale, decision, confidence,
                                               reason, rule, old_source, new_source, candidate_id,
                                               decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(segment_id, target_locale)
                 DO UPDATE SET decision = excluded.decision,
                               confidence = excluded.confidence,
                               reason = excluded.reason,
                               rule = excluded.rule,
                               old_source = excluded.old_source,
                               new_source = excluded.new_source,
                               candidate_id = excluded.candidate_id,
                               decided_at = excluded.decided_at",
                params![
                    &decision.segment_id,
                    &decision.target_locale,
                    decision.classification.decision.as_str(),
                    decision.classification.confidence,
                    &decision.classification.reason,
                    decision.classification.rule.as_str(),
                    &decision.old_source,
                    &decision.new_source,
                    &decision.candidate_id,
                    decision.decided_at,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Latest stored change decision for a pair
    pub async fn change_decision(
        &self,
        segment_id: &str,
        target_locale: &str,
    ) -> MtResult<Option<StoredChangeDecision>> {
        let (key_segment, key_locale) = (segment_id.to_string(), target_locale.to_string());
        let row = self
            .call(move |db| {
                let row = db
                    .query_row(
                        "SELECT decision, confidence, reason, rule, old_source, new_source,
                                candidate_id, decided_at
                         FROM change_decisions
                         WHERE segment_id = ?1 AND target_locale = ?2",
                        params![&key_segment, &key_locale],
                        |r| {
                            Ok((
                                r.get::<_, String>(0)?,
                                r.get::<_, f64>(1)?,
                                r.get::<_, String>(2)?,
                                r.get::<_, String>(3)?,
                                r.get::<_, String>(4)?,
                                r.get::<_, String>(5)?,
                                r.get::<_, Option<String>>(6)?,
                                r.get::<_, i64>(7)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((decision, confidence, reason, rule, old_source, new_source, candidate_id, decided_at)) =
            row
        else {
            return Ok(None);
        };
        let decision = ChangeDecision::parse(&decision)
            .ok_or_else(|| MtError::Translation(format!("Unknown change decision '{decision}'")))?;
        Ok(Some(StoredChangeDecision {
            segment_id: segment_id.to_string(),
            target_locale: target_locale.to_string(),
            classification: ChangeClassification {
                decision,
                confidence,
                reason,
                rule: ChangeRule::parse(&rule).unwrap_or(ChangeRule::Ambiguous),
            },
            old_source,
            new_source,
            candidate_id,
            decided_at,
        }))
    }
}
