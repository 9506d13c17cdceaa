//! Master memory items and their evidence trail
//!
//! Deduplication is enforced by the `(owner_id, bucket, norm_text)` unique key:
//! an upsert is a single `INSERT ... ON CONFLICT DO UPDATE`, so two concurrent
//! writers of the same claim produce one row with one extra reinforcement.

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::memory_db::schema::*;
use crate::memory_db::{now_timestamp, parse_datetime_safe, vector};

/// Dedup key form of a claim.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct MasterUpsert {
    pub owner_id: String,
    pub bucket: Bucket,
    pub text: String,
    pub status: ItemStatus,
    pub stability: Stability,
    pub confidence: f32,
    /// `None` never clears a stored vector.
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub id: String,
    pub reinforcement_count: i64,
}

impl UpsertOutcome {
    pub fn created(&self) -> bool {
        self.reinforcement_count == 1
    }
}

#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub master_item_id: String,
    pub conversation_id: Option<String>,
    pub event_id: Option<String>,
    pub summary_id: Option<String>,
    pub weight: f32,
    pub metadata: serde_json::Value,
}

const ITEM_COLUMNS: &str = "id, owner_id, bucket, text, status, stability, confidence, \
     reinforcement_count, last_seen_at, last_reinforced_at, metadata, embedding, created_at, updated_at";

pub struct MasterStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MasterStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn upsert(&self, item: &MasterUpsert) -> anyhow::Result<UpsertOutcome> {
        let conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let (_, now_str) = now_timestamp();
        let blob = vector::encode_opt(item.embedding.as_deref())?;

        let outcome = conn.query_row(
            "INSERT INTO master_items
             (id, owner_id, bucket, text, norm_text, status, stability, confidence,
              reinforcement_count, last_seen_at, last_reinforced_at, metadata, embedding,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9, ?10, ?11, ?9, ?9)
             ON CONFLICT(owner_id, bucket, norm_text) DO UPDATE SET
                status = excluded.status,
                stability = excluded.stability,
                confidence = excluded.confidence,
                reinforcement_count = master_items.reinforcement_count + 1,
                last_seen_at = excluded.last_seen_at,
                last_reinforced_at = excluded.last_reinforced_at,
                updated_at = excluded.updated_at,
                metadata = json_patch(master_items.metadata, excluded.metadata),
                embedding = COALESCE(excluded.embedding, master_items.embedding)
             RETURNING id, reinforcement_count",
            params![
                id,
                item.owner_id,
                item.bucket.as_str(),
                item.text.trim(),
                normalize_text(&item.text),
                item.status.as_str(),
                item.stability.as_str(),
                item.confidence as f64,
                now_str,
                serde_json::to_string(&item.metadata)?,
                blob,
            ],
            |row| {
                Ok(UpsertOutcome {
                    id: row.get(0)?,
                    reinforcement_count: row.get(1)?,
                })
            },
        )?;

        debug!(
            "Upserted master item {} [{}] for {} (reinforcement {})",
            outcome.id, item.bucket, item.owner_id, outcome.reinforcement_count
        );
        Ok(outcome)
    }

    pub fn add_evidence(&self, evidence: &NewEvidence) -> anyhow::Result<MasterEvidence> {
        let conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();
        conn.execute(
            "INSERT INTO master_evidence
             (id, master_item_id, conversation_id, event_id, summary_id, weight, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                evidence.master_item_id,
                evidence.conversation_id,
                evidence.event_id,
                evidence.summary_id,
                evidence.weight as f64,
                serde_json::to_string(&evidence.metadata)?,
                now_str,
            ],
        )?;
        Ok(MasterEvidence {
            id,
            master_item_id: evidence.master_item_id.clone(),
            conversation_id: evidence.conversation_id.clone(),
            event_id: evidence.event_id.clone(),
            summary_id: evidence.summary_id.clone(),
            weight: evidence.weight,
            metadata: evidence.metadata.clone(),
            created_at: now,
        })
    }

    pub fn get(&self, item_id: &str) -> anyhow::Result<Option<MasterItem>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM master_items WHERE id = ?1", ITEM_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([item_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_item(row)?)),
            None => Ok(None),
        }
    }

    /// Ordered by confidence, then reinforcement, then recency.
    pub fn list(
        &self,
        owner_id: &str,
        bucket: Option<Bucket>,
        status: Option<ItemStatus>,
        limit: usize,
    ) -> anyhow::Result<Vec<MasterItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM master_items
             WHERE owner_id = ?1
               AND (?2 IS NULL OR bucket = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY confidence DESC, reinforcement_count DESC, updated_at DESC
             LIMIT ?4",
            ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            owner_id,
            bucket.map(|b| b.as_str()),
            status.map(|s| s.as_str()),
            limit as i64,
        ])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    /// Nearest neighbours by L2 distance among rows that carry an embedding.
    pub fn search_by_vector(
        &self,
        owner_id: &str,
        query: &[f32],
        bucket: Option<Bucket>,
        status: Option<ItemStatus>,
        k: usize,
    ) -> anyhow::Result<Vec<ScoredMasterItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM master_items
             WHERE owner_id = ?1
               AND embedding IS NOT NULL
               AND (?2 IS NULL OR bucket = ?2)
               AND (?3 IS NULL OR status = ?3)",
            ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            owner_id,
            bucket.map(|b| b.as_str()),
            status.map(|s| s.as_str()),
        ])?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next()? {
            let item = Self::row_to_item(row)?;
            let distance = match item.embedding.as_deref().and_then(|e| vector::l2_distance(e, query)) {
                Some(d) => d,
                None => {
                    warn!("Skipping master item {} with mismatched embedding dimension", item.id);
                    continue;
                }
            };
            scored.push(ScoredMasterItem { item, distance });
        }

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn evidence_for(&self, item_id: &str) -> anyhow::Result<Vec<MasterEvidence>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, master_item_id, conversation_id, event_id, summary_id, weight, metadata, created_at
             FROM master_evidence WHERE master_item_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let mut rows = stmt.query([item_id])?;
        let mut evidence = Vec::new();
        while let Some(row) = rows.next()? {
            let metadata_json: String = row.get(6)?;
            evidence.push(MasterEvidence {
                id: row.get(0)?,
                master_item_id: row.get(1)?,
                conversation_id: row.get(2)?,
                event_id: row.get(3)?,
                summary_id: row.get(4)?,
                weight: row.get::<_, f64>(5)? as f32,
                metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
                created_at: parse_datetime_safe(&row.get::<_, String>(7)?).unwrap_or_else(Utc::now),
            });
        }
        Ok(evidence)
    }

    fn row_to_item(row: &Row) -> anyhow::Result<MasterItem> {
        let bucket: String = row.get(2)?;
        let status: String = row.get(4)?;
        let stability: String = row.get(5)?;
        let metadata_json: String = row.get(10)?;
        let timestamp = |idx: usize| -> anyhow::Result<chrono::DateTime<Utc>> {
            Ok(parse_datetime_safe(&row.get::<_, String>(idx)?).unwrap_or_else(Utc::now))
        };
        Ok(MasterItem {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            bucket: bucket.parse()?,
            text: row.get(3)?,
            status: status.parse()?,
            stability: stability.parse()?,
            confidence: row.get::<_, f64>(6)? as f32,
            reinforcement_count: row.get(7)?,
            last_seen_at: timestamp(8)?,
            last_reinforced_at: timestamp(9)?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
            embedding: vector::decode_opt(row.get(11)?)?,
            created_at: timestamp(12)?,
            updated_at: timestamp(13)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    fn claim(text: &str, embedding: Option<Vec<f32>>) -> MasterUpsert {
        MasterUpsert {
            owner_id: "u1".into(),
            bucket: Bucket::Preferences,
            text: text.into(),
            status: ItemStatus::Active,
            stability: Stability::Med,
            confidence: 0.9,
            embedding,
            metadata: serde_json::json!({"source": "test"}),
        }
    }

    #[test]
    fn test_upsert_dedups_on_normalized_text() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let first = db.master.upsert(&claim("Likes dark roast", None)).unwrap();
        let second = db.master.upsert(&claim("  likes DARK roast ", None)).unwrap();
        assert!(first.created());
        assert_eq!(first.id, second.id);
        assert_eq!(second.reinforcement_count, 2);

        let items = db.master.list("u1", None, None, 50).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "Likes dark roast");
    }

    #[test]
    fn test_normalization_keeps_inner_whitespace() {
        assert_eq!(normalize_text("  Likes DARK roast\n"), "likes dark roast");
        assert_eq!(normalize_text("Likes  dark roast"), "likes  dark roast");

        let db = MemoryDatabase::new_in_memory().unwrap();
        let first = db.master.upsert(&claim("Likes dark roast", None)).unwrap();
        let spaced = db.master.upsert(&claim("Likes  dark roast", None)).unwrap();
        assert_ne!(first.id, spaced.id);
        assert_eq!(db.master.list("u1", None, None, 50).unwrap().len(), 2);
    }

    #[test]
    fn test_metadata_is_merged() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.master.upsert(&claim("x", None)).unwrap();
        let mut again = claim("x", None);
        again.metadata = serde_json::json!({"summary_id": "s1"});
        let outcome = db.master.upsert(&again).unwrap();
        let item = db.master.get(&outcome.id).unwrap().unwrap();
        assert_eq!(item.metadata["source"], "test");
        assert_eq!(item.metadata["summary_id"], "s1");
    }

    #[test]
    fn test_search_orders_by_distance() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.master.upsert(&claim("near", Some(vec![1.0, 0.0]))).unwrap();
        db.master.upsert(&claim("far", Some(vec![-1.0, 0.0]))).unwrap();
        db.master.upsert(&claim("no vector", None)).unwrap();

        let hits = db
            .master
            .search_by_vector("u1", &[0.9, 0.1], None, Some(ItemStatus::Active), 5)
            .unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.item.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "far"]);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn test_evidence_is_append_only() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let outcome = db.master.upsert(&claim("x", None)).unwrap();
        let evidence = db
            .master
            .add_evidence(&NewEvidence {
                master_item_id: outcome.id.clone(),
                conversation_id: Some("c1".into()),
                event_id: None,
                summary_id: None,
                weight: 1.0,
                metadata: serde_json::json!({}),
            })
            .unwrap();
        {
            let conn = db.master.get_conn().unwrap();
            let result = conn.execute(
                "UPDATE master_evidence SET weight = 2.0 WHERE id = ?1",
                [&evidence.id],
            );
            assert!(result.is_err());
        }
        assert_eq!(db.master.evidence_for(&outcome.id).unwrap().len(), 1);
    }
}
