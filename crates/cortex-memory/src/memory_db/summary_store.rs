//! Thread summary storage with conditional state transitions
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode, Row};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::memory_db::schema::*;
use crate::memory_db::{now_timestamp, parse_datetime_safe, vector};

/// Content of a summary row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewSummary {
    pub summary_text: String,
    pub range_start_event_id: Option<String>,
    pub range_end_event_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: SummaryMetadata,
}

/// In-place rolling update. A `None` embedding keeps the stored vector.
#[derive(Debug, Clone)]
pub struct SummaryUpdate {
    pub summary_text: String,
    pub range_end_event_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: SummaryMetadata,
}

/// Narrow read capability over the active summary of a conversation.
pub trait ActiveSummaryReader: Send + Sync {
    fn active_summary(&self, conversation_id: &str) -> anyhow::Result<Option<ThreadSummary>>;
}

impl ActiveSummaryReader for SummaryStore {
    fn active_summary(&self, conversation_id: &str) -> anyhow::Result<Option<ThreadSummary>> {
        self.get_active(conversation_id)
    }
}

const SUMMARY_COLUMNS: &str = "id, conversation_id, summary_text, range_start_event_id, \
     range_end_event_id, embedding, metadata, is_active, revision, created_at, updated_at";

pub struct SummaryStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SummaryStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn get_active(&self, conversation_id: &str) -> anyhow::Result<Option<ThreadSummary>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM thread_summaries WHERE conversation_id = ?1 AND is_active = 1 LIMIT 1",
            SUMMARY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([conversation_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_summary(row)?)),
            None => Ok(None),
        }
    }

    /// Every row for a conversation, archived included, oldest first.
    pub fn list_for_conversation(&self, conversation_id: &str) -> anyhow::Result<Vec<ThreadSummary>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM thread_summaries WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            SUMMARY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([conversation_id])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(Self::row_to_summary(row)?);
        }
        Ok(summaries)
    }

    /// Inserts the first active row. `None` means another writer got there first.
    pub fn insert_initial(
        &self,
        conversation_id: &str,
        summary: NewSummary,
    ) -> anyhow::Result<Option<ThreadSummary>> {
        let conn = self.get_conn()?;
        match Self::insert_active(&conn, conversation_id, summary) {
            Ok(row) => Ok(Some(row)),
            Err(e) if is_constraint_violation(&e) => {
                warn!("Active summary already exists for {}; insert skipped", conversation_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Archives `expected_active_id` and inserts a fresh active row in one
    /// transaction. `None` if the expected row is no longer the active one.
    pub fn archive_and_insert(
        &self,
        conversation_id: &str,
        expected_active_id: &str,
        summary: NewSummary,
    ) -> anyhow::Result<Option<ThreadSummary>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let archived = tx.execute(
            "UPDATE thread_summaries SET is_active = 0, updated_at = ?3
             WHERE id = ?1 AND conversation_id = ?2 AND is_active = 1",
            params![expected_active_id, conversation_id, now_timestamp().1],
        )?;
        if archived == 0 {
            debug!(
                "Active summary {} changed before archive for {}; skipping",
                expected_active_id, conversation_id
            );
            return Ok(None);
        }

        let inserted = Self::insert_active(&tx, conversation_id, summary)?;
        tx.commit()?;

        info!(
            "Archived summary {} and started episode {} for conversation {}",
            expected_active_id, inserted.id, conversation_id
        );
        Ok(Some(inserted))
    }

    /// Rolling update guarded by id and revision. Returns false on a lost race.
    pub fn update_active(
        &self,
        summary_id: &str,
        expected_revision: i64,
        update: SummaryUpdate,
    ) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let blob = vector::encode_opt(update.embedding.as_deref())?;
        let changed = conn.execute(
            "UPDATE thread_summaries SET
                summary_text = ?1,
                range_end_event_id = ?2,
                embedding = COALESCE(?3, embedding),
                metadata = json_patch(metadata, ?4),
                revision = revision + 1,
                updated_at = ?5
             WHERE id = ?6 AND is_active = 1 AND revision = ?7",
            params![
                update.summary_text,
                update.range_end_event_id,
                blob,
                serde_json::to_string(&update.metadata)?,
                now_timestamp().1,
                summary_id,
                expected_revision,
            ],
        )?;
        Ok(changed > 0)
    }

    fn insert_active(
        conn: &rusqlite::Connection,
        conversation_id: &str,
        summary: NewSummary,
    ) -> anyhow::Result<ThreadSummary> {
        let id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();
        let blob = vector::encode_opt(summary.embedding.as_deref())?;
        conn.execute(
            "INSERT INTO thread_summaries
             (id, conversation_id, summary_text, range_start_event_id, range_end_event_id,
              embedding, metadata, is_active, revision, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 0, ?8, ?8)",
            params![
                id,
                conversation_id,
                summary.summary_text,
                summary.range_start_event_id,
                summary.range_end_event_id,
                blob,
                serde_json::to_string(&summary.metadata)?,
                now_str,
            ],
        )?;
        Ok(ThreadSummary {
            id,
            conversation_id: conversation_id.to_string(),
            summary_text: summary.summary_text,
            range_start_event_id: summary.range_start_event_id,
            range_end_event_id: summary.range_end_event_id,
            embedding: summary.embedding,
            metadata: summary.metadata,
            is_active: true,
            revision: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn row_to_summary(row: &Row) -> anyhow::Result<ThreadSummary> {
        let metadata_json: String = row.get(6)?;
        let metadata: SummaryMetadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
            warn!("Summary metadata JSON error: {}", e);
            SummaryMetadata::default()
        });
        let created_at = parse_datetime_safe(&row.get::<_, String>(9)?).unwrap_or_else(Utc::now);
        let updated_at = parse_datetime_safe(&row.get::<_, String>(10)?).unwrap_or_else(Utc::now);
        Ok(ThreadSummary {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            summary_text: row.get(2)?,
            range_start_event_id: row.get(3)?,
            range_end_event_id: row.get(4)?,
            embedding: vector::decode_opt(row.get(5)?)?,
            metadata,
            is_active: row.get::<_, i64>(7)? != 0,
            revision: row.get(8)?,
            created_at,
            updated_at,
        })
    }
}

fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    fn new_summary(text: &str) -> NewSummary {
        NewSummary {
            summary_text: text.to_string(),
            range_start_event_id: None,
            range_end_event_id: None,
            embedding: Some(vec![1.0, 0.0]),
            metadata: SummaryMetadata {
                reason: Some("init".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_second_initial_insert_loses_race() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let conv = db.conversations.create_conversation("u1", None).unwrap();
        assert!(db.summaries.insert_initial(&conv.id, new_summary("a")).unwrap().is_some());
        assert!(db.summaries.insert_initial(&conv.id, new_summary("b")).unwrap().is_none());
        assert_eq!(db.summaries.list_for_conversation(&conv.id).unwrap().len(), 1);
    }

    #[test]
    fn test_archive_requires_expected_active_row() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let conv = db.conversations.create_conversation("u1", None).unwrap();
        let first = db.summaries.insert_initial(&conv.id, new_summary("a")).unwrap().unwrap();

        assert!(db
            .summaries
            .archive_and_insert(&conv.id, "not-the-active-id", new_summary("x"))
            .unwrap()
            .is_none());

        let second = db
            .summaries
            .archive_and_insert(&conv.id, &first.id, new_summary("b"))
            .unwrap()
            .unwrap();
        let all = db.summaries.list_for_conversation(&conv.id).unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].is_active);
        assert_eq!(db.summaries.get_active(&conv.id).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_update_checks_revision_and_keeps_embedding() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let conv = db.conversations.create_conversation("u1", None).unwrap();
        let row = db.summaries.insert_initial(&conv.id, new_summary("a")).unwrap().unwrap();

        let update = SummaryUpdate {
            summary_text: "a + b".into(),
            range_end_event_id: Some("e9".into()),
            embedding: None,
            metadata: SummaryMetadata {
                reason: Some("rolling_update".into()),
                ..Default::default()
            },
        };
        assert!(db.summaries.update_active(&row.id, 0, update.clone()).unwrap());
        assert!(!db.summaries.update_active(&row.id, 0, update).unwrap());

        let active = db.summaries.get_active(&conv.id).unwrap().unwrap();
        assert_eq!(active.summary_text, "a + b");
        assert_eq!(active.revision, 1);
        assert_eq!(active.embedding, Some(vec![1.0, 0.0]));
        assert_eq!(active.metadata.reason.as_deref(), Some("rolling_update"));
    }
}
