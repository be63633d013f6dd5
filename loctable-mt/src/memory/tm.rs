//! Translation memory: exact and fuzzy retrieval, approval-only learning

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::normalize::{fts_query, similarity, source_hash};
use super::{Store, now_millis};
use crate::error::MtResult;

/// Project and locale pair a memory lookup is confined to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    pub project_id: String,
    pub source_locale: String,
    pub target_locale: String,
}

impl MemoryScope {
    pub fn new(project_id: &str, source_locale: &str, target_locale: &str) -> Self {
        MemoryScope {
            project_id: project_id.to_string(),
            source_locale: source_locale.to_string(),
            target_locale: target_locale.to_string(),
        }
    }
}

/// One approved (source, target) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub project_id: String,
    pub source_locale: String,
    pub target_locale: String,
    pub source_hash: String,
    /// Source text as last approved (not normalized)
    pub source_text: String,
    pub target_text: String,
    /// Always `approved-only`
    pub provenance: String,
    /// Reference to what produced the approval, e.g. a candidate id
    pub provenance_ref: Option<String>,
    pub quality: String,
    pub use_count: i64,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A fuzzy search result with its similarity score (0-100)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyHit {
    pub entry: MemoryEntry,
    pub score: f64,
}

const ENTRY_COLUMNS: &str = "e.id, e.project_id, e.source_locale, e.target_locale, e.source_hash, \
     e.source_text, e.target_text, e.provenance, e.provenance_ref, e.quality, e.use_count, \
     e.last_used_at, e.created_at, e.updated_at";

fn entry_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: r.get(0)?,
        project_id: r.get(1)?,
        source_locale: r.get(2)?,
        target_locale: r.get(3)?,
        source_hash: r.get(4)?,
        source_text: r.get(5)?,
        target_text: r.get(6)?,
        provenance: r.get(7)?,
        provenance_ref: r.get(8)?,
        quality: r.get(9)?,
        use_count: r.get(10)?,
        last_used_at: r.get(11)?,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
    })
}

/// Insert or update the entry for the normalized source and keep the full-text
/// index in step. Callers provide the transaction.
pub(crate) fn upsert_entry(
    conn: &Connection,
    scope: &MemoryScope,
    source_text: &str,
    target_text: &str,
    provenance_ref: Option<&str>,
) -> rusqlite::Result<String> {
    let hash = source_hash(source_text);
    let now = now_millis();
    conn.execute(
        "INSERT INTO tm_entries (id, project_id, source_locale, target_locale, source_hash,
                                 source_text, target_text, provenance_ref, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(project_id, source_locale, target_locale, source_hash)
         DO UPDATE SET source_text = excluded.source_text,
                       target_text = excluded.target_text,
                       provenance_ref = excluded.provenance_ref,
                       updated_at = excluded.updated_at",
        params![
            uuid::Uuid::new_v4().to_string(),
            &scope.project_id,
            &scope.source_locale,
            &scope.target_locale,
            &hash,
            source_text,
            target_text,
            provenance_ref,
            now,
        ],
    )?;

    let id: String = conn.query_row(
        "SELECT id FROM tm_entries
         WHERE project_id = ?1 AND source_locale = ?2 AND target_locale = ?3 AND source_hash = ?4",
        params![
            &scope.project_id,
            &scope.source_locale,
            &scope.target_locale,
            &hash
        ],
        |r| r.get(0),
    )?;

    conn.execute("DELETE FROM tm_fts WHERE entry_id = ?1", params![&id])?;
    conn.execute(
        "INSERT INTO tm_fts (entry_id, project_id, source_locale, target_locale, source_text)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            &id,
            &scope.project_id,
            &scope.source_locale,
            &scope.target_locale,
            source_text
        ],
    )?;
    Ok(id)
}

impl Store {
    /// Exact lookup on the normalized source hash
    pub async fn find_exact(
        &self,
        scope: &MemoryScope,
        source_text: &str,
    ) -> MtResult<Option<MemoryEntry>> {
        let scope = scope.clone();
        let hash = source_hash(source_text);
        self.call(move |db| {
            let entry = db
                .query_row(
                    &format!(
                        "SELECT {ENTRY_COLUMNS} FROM tm_entries e
                         WHERE e.project_id = ?1 AND e.source_locale = ?2
                           AND e.target_locale = ?3 AND e.source_hash = ?4"
                    ),
                    params![
                        &scope.project_id,
                        &scope.source_locale,
                        &scope.target_locale,
                        &hash
                    ],
                    entry_from_row,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    /// Approximate lookup, best match first.
    ///
    /// Up to `cap` full-text candidates are re-ranked by [`similarity`]. Text
    /// without any words falls back to the most recently updated entries.
    /// No threshold is applied here.
    pub async fn search_fuzzy(
        &self,
        scope: &MemoryScope,
        text: &str,
        cap: usize,
    ) -> MtResult<Vec<FuzzyHit>> {
        let scope = scope.clone();
        let query = fts_query(text);
        let limit = cap.max(1) as i64;
        let entries: Vec<MemoryEntry> = self
            .call(move |db| {
                let rows = match query {
                    Some(query) => {
                        let mut stmt = db.prepare(&format!(
                            "SELECT {ENTRY_COLUMNS} FROM tm_fts
                             JOIN tm_entries e ON e.id = tm_fts.entry_id
                             WHERE tm_fts MATCH ?1
                               AND tm_fts.project_id = ?2
                               AND tm_fts.source_locale = ?3
                               AND tm_fts.target_locale = ?4
                             ORDER BY rank
                             LIMIT ?5"
                        ))?;
                        let rows = stmt
                            .query_map(
                                params![
                                    query,
                                    &scope.project_id,
                                    &scope.source_locale,
                                    &scope.target_locale,
                                    limit
                                ],
                                entry_from_row,
                            )?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = db.prepare(&format!(
                            "SELECT {ENTRY_COLUMNS} FROM tm_entries e
                             WHERE e.project_id = ?1 AND e.source_locale = ?2
                               AND e.target_locale = ?3
                             ORDER BY e.updated_at DESC
                             LIMIT ?4"
                        ))?;
                        let rows = stmt
                            .query_map(
                                params![
                                    &scope.project_id,
                                    &scope.source_locale,
                                    &scope.target_locale,
                                    limit
                                ],
                                entry_from_row,
                            )?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await?;

        let mut hits: Vec<FuzzyHit> = entries
            .into_iter()
            .map(|entry| FuzzyHit {
                score: similarity(text, &entry.source_text),
                entry,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.entry.use_count.cmp(&a.entry.use_count))
                .then_with(|| b.entry.updated_at.cmp(&a.entry.updated_at))
        });
        Ok(hits)
    }

    /// The only write path into translation memory.
    ///
    /// Upserts the entry for the normalized source: an existing entry gets the
    /// new target text and timestamp, otherwise one is inserted. Usage counters
    /// are left alone. Returns the entry id.
    pub async fn record_approval(
        &self,
        scope: &MemoryScope,
        source_text: &str,
        target_text: &str,
        provenance_ref: Option<&str>,
    ) -> MtResult<String> {
        let scope = scope.clone();
        let source_text = source_text.to_string();
        let target_text = target_text.to_string();
        let provenance_ref = provenance_ref.map(str::to_string);
        let target_locale = scope.target_locale.clone();
        let id = self
            .call(move |db| {
                let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let id = upsert_entry(
                    &tx,
                    &scope,
                    &source_text,
                    &target_text,
                    provenance_ref.as_deref(),
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await?;
        tracing::debug!(entry_id = %id, target_locale = %target_locale, "Recorded approval in memory");
        Ok(id)
    }

    /// Count one use of an entry as a candidate
    pub async fn record_use(&self, entry_id: &str) -> MtResult<()> {
        let entry_id = entry_id.to_string();
        self.call(move |db| {
            let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            tx.execute(
                "UPDATE tm_entries SET use_count = use_count + 1, last_used_at = ?1 WHERE id = ?2",
                params![now_millis(), &entry_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn memory_entry(&self, entry_id: &str) -> MtResult<Option<MemoryEntry>> {
        let entry_id = entry_id.to_string();
        self.call(move |db| {
            let entry = db
                .query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM tm_entries e WHERE e.id = ?1"),
                    params![&entry_id],
                    entry_from_row,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    pub async fn memory_entry_count(&self) -> MtResult<usize> {
        self.call(|db| {
            let count: i64 = db.query_row("SELECT COUNT(*) FROM tm_entries", [], |r| r.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
