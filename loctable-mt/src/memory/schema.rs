/// DDL for the schema_version tracking table, applied on every open.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the v1 schema.
///
/// - `tm_entries`: approved-only translation memory, unique per
///   (project, locale pair, normalized source hash); `tm_fts` indexes its source text.
/// - `candidates`: immutable translation candidates per (segment, target locale).
/// - `approved_translations`: one authoritative text per (segment, target locale).
/// - `qa_flags`: current QA findings per (segment, target locale).
/// - `row_status`: pipeline progress per (segment, target locale).
/// - `change_decisions`: latest KEEP/UPDATE/FLAG per (segment, target locale).
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS tm_entries (
        id             TEXT    PRIMARY KEY,
        project_id     TEXT    NOT NULL,
        source_locale  TEXT    NOT NULL,
        target_locale  TEXT    NOT NULL,
        source_hash    TEXT    NOT NULL,
        source_text    TEXT    NOT NULL,
        target_text    TEXT    NOT NULL,
        provenance     TEXT    NOT NULL DEFAULT 'approved-only',
        provenance_ref TEXT,
        quality        TEXT    NOT NULL DEFAULT 'approved',
        use_count      INTEGER NOT NULL DEFAULT 0,
        last_used_at   INTEGER,
        created_at     INTEGER NOT NULL,
        updated_at     INTEGER NOT NULL,
        UNIQUE (project_id, source_locale, target_locale, source_hash)
    ) STRICT;

    CREATE VIRTUAL TABLE IF NOT EXISTS tm_fts USING fts5(
        entry_id UNINDEXED,
        project_id UNINDEXED,
        source_locale UNINDEXED,
        target_locale UNINDEXED,
        source_text
    );

    CREATE TABLE IF NOT EXISTS candidates (
        id              TEXT    PRIMARY KEY,
        segment_id      TEXT    NOT NULL,
        target_locale   TEXT    NOT NULL,
        text            TEXT    NOT NULL,
        origin          TEXT    NOT NULL
                                CHECK(origin IN ('memory-exact', 'memory-fuzzy', 'generated',
                                                 'generated-reviewed', 'existing-baseline',
                                                 'change-proposal', 'manual-edit')),
        memory_entry_id TEXT,
        score           REAL,
        created_at      INTEGER NOT NULL
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_candidates_pair
        ON candidates (segment_id, target_locale, created_at);

    CREATE TABLE IF NOT EXISTS approved_translations (
        segment_id     TEXT    NOT NULL,
        target_locale  TEXT    NOT NULL,
        final_text     TEXT    NOT NULL,
        candidate_id   TEXT,
        memory_entry_id TEXT,
        pinned         INTEGER NOT NULL DEFAULT 0,
        approved_by    TEXT,
        approved_at    INTEGER NOT NULL,
        PRIMARY KEY (segment_id, target_locale)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS qa_flags (
        id             TEXT    PRIMARY KEY,
        segment_id     TEXT    NOT NULL,
        target_locale  TEXT    NOT NULL,
        kind           TEXT    NOT NULL,
        severity       TEXT    NOT NULL CHECK(severity IN ('warn', 'error')),
        message        TEXT    NOT NULL,
        detail         TEXT    NOT NULL DEFAULT '{}',
        created_at     INTEGER NOT NULL
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_qa_flags_pair ON qa_flags (segment_id, target_locale);

    CREATE TABLE IF NOT EXISTS row_status (
        segment_id     TEXT    NOT NULL,
        target_locale  TEXT    NOT NULL,
        state          TEXT    NOT NULL,
        source_hash    TEXT    NOT NULL,
        last_error     TEXT,
        updated_at     INTEGER NOT NULL,
        PRIMARY KEY (segment_id, target_locale)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS change_decisions (
        segment_id     TEXT    NOT NULL,
        target_locale  TEXT    NOT NULL,
        decision       TEXT    NOT NULL CHECK(decision IN ('KEEP', 'UPDATE', 'FLAG')),
        confidence     REAL    NOT NULL,
        reason         TEXT    NOT NULL,
        rule           TEXT    NOT NULL,
        old_source     TEXT    NOT NULL,
        new_source     TEXT    NOT NULL,
        candidate_id   TEXT,
        decided_at     INTEGER NOT NULL,
        PRIMARY KEY (segment_id, target_locale)
    ) STRICT;
";

/// Runs forward-only schema migration to the latest version.
///
/// Idempotent: safe to call on every open.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if version < 1 {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA_V1_SQL)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
    }

    Ok(())
}
