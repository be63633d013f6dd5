//! Local transactional store: translation memory, candidates, approvals,
//! QA flags, row status and change decisions
//!
//! One SQLite connection owned by a `tokio_rusqlite` background thread, so
//! queries never block a runtime worker. Every write runs inside a
//! `BEGIN IMMEDIATE` transaction; memory writes are `ON CONFLICT` upserts on
//! the normalized source hash.

pub mod normalize;
pub mod records;
pub mod schema;
pub mod tm;

use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_rusqlite::Connection;

use crate::error::MtResult;

pub use normalize::{fts_query, normalize_text, similarity, source_hash};
pub use records::{
    ApprovalRequest, ApprovedTranslation, NewCandidate, RowOutcome, RowStatus, StoredChangeDecision,
    TranslationCandidate,
};
pub use tm::{FuzzyHit, MemoryEntry, MemoryScope};

/// Handle to the pipeline database
pub struct Store {
    conn: Connection,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a file database in WAL mode and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> MtResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Store { conn };
        store
            .call(|db| {
                db.execute_batch(
                    "PRAGMA journal_mode=WAL;
                     PRAGMA synchronous=NORMAL;
                     PRAGMA foreign_keys=ON;",
                )?;
                db.busy_timeout(Duration::from_secs(5))?;
                schema::migrate(db)?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    /// Fresh in-memory database, used by tests and one-off runs
    pub async fn open_in_memory() -> MtResult<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Store { conn };
        store
            .call(|db| {
                schema::migrate(db)?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    /// Run `f` on the connection thread.
    ///
    /// Closure errors come back as they are; only a closed connection turns
    /// into [`MtError::Database`](crate::error::MtError::Database).
    pub(crate) async fn call<R, F>(&self, f: F) -> MtResult<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> MtResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn
            .call(move |db| Ok::<_, rusqlite::Error>(f(db)))
            .await?
    }
}

/// Current Unix timestamp in milliseconds
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_file_database_uses_wal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("loctable.db");
        let store = Store::open(&path).await.unwrap();
        let journal: String = store
            .call(|db| Ok(db.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(journal, "wal");
        drop(store);

        // Reopening keeps the schema version at 1
        let store = Store::open(&path).await.unwrap();
        let version: i64 = store
            .call(|db| {
                Ok(db.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_store_calls_do_not_block_the_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("loctable.db");
        let store = Store::open(&path).await.unwrap();

        // A second writer holds the database lock for longer than the ticker runs
        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let ticker = tokio::spawn(async {
            let started = std::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(50)).await;
            started.elapsed()
        });
        let write = tokio::spawn(async move { store.mark_pending("row-1", "de-DE", "h", "x").await });

        let ticked = ticker.await.unwrap();
        assert!(ticked < Duration::from_millis(1000), "runtime stalled for {ticked:?}");

        blocker.execute_batch("COMMIT;").unwrap();
        write.await.unwrap().unwrap();
    }
}
