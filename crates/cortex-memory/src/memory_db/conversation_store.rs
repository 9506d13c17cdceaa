//! Conversation, event and reaction storage

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::memory_db::schema::*;
use crate::memory_db::{now_timestamp, parse_datetime_safe, vector};

/// Insert parameters for a new event.
pub struct EventParams<'a> {
    pub conversation_id: &'a str,
    pub actor: Actor,
    pub content: &'a str,
    pub metadata: &'a serde_json::Value,
    pub importance_score: u8,
    pub embedding: Option<&'a [f32]>,
}

const EVENT_COLUMNS: &str =
    "seq, id, conversation_id, actor, content, metadata, importance_score, embedding, created_at";

pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn create_conversation(
        &self,
        owner_id: &str,
        title: Option<&str>,
    ) -> anyhow::Result<Conversation> {
        let conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();
        let metadata = ConversationMetadata::default();

        conn.execute(
            "INSERT INTO conversations (id, owner_id, title, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, owner_id, title, now_str, serde_json::to_string(&metadata)?],
        )?;

        info!("Created conversation {} for owner {}", id, owner_id);
        Ok(Conversation {
            id,
            owner_id: owner_id.to_string(),
            title: title.map(str::to_string),
            created_at: now,
            metadata,
        })
    }

    pub fn get_conversation(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, created_at, metadata FROM conversations WHERE id = ?1",
        )?;
        let mut rows = stmt.query([conversation_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_conversation(row)?)),
            None => Ok(None),
        }
    }

    /// Most recently created first.
    pub fn list_conversations(&self, owner_id: &str, limit: usize) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, created_at, metadata FROM conversations
             WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![owner_id, limit as i64])?;
        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(Self::row_to_conversation(row)?);
        }
        Ok(conversations)
    }

    /// Returns false when the flag was already set.
    pub fn mark_promoted(&self, conversation_id: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE conversations SET metadata = json_set(metadata, '$.promoted', json('true'))
             WHERE id = ?1 AND COALESCE(json_extract(metadata, '$.promoted'), 0) = 0",
            [conversation_id],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_event(&self, params: EventParams<'_>) -> anyhow::Result<Event> {
        let conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();
        let blob = vector::encode_opt(params.embedding)?;

        conn.execute(
            "INSERT INTO events
             (id, conversation_id, actor, content, metadata, importance_score, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                params.conversation_id,
                params.actor.as_str(),
                params.content,
                serde_json::to_string(params.metadata)?,
                params.importance_score,
                blob,
                now_str,
            ],
        )?;
        let seq = conn.last_insert_rowid();

        debug!(
            "Stored {} event {} in conversation {} (score {})",
            params.actor, id, params.conversation_id, params.importance_score
        );
        Ok(Event {
            seq,
            id,
            conversation_id: params.conversation_id.to_string(),
            actor: params.actor,
            content: params.content.to_string(),
            metadata: params.metadata.clone(),
            importance_score: params.importance_score,
            embedding: params.embedding.map(<[f32]>::to_vec),
            created_at: now,
        })
    }

    pub fn get_event(&self, event_id: &str) -> anyhow::Result<Option<Event>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([event_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_event(row)?)),
            None => Ok(None),
        }
    }

    /// The last `limit` events, returned oldest first.
    pub fn recent_events(&self, conversation_id: &str, limit: usize) -> anyhow::Result<Vec<Event>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM events WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![conversation_id, limit as i64])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(Self::row_to_event(row)?);
        }
        events.reverse();
        Ok(events)
    }

    /// Events strictly after `after_event_id` (or from the start), oldest first.
    pub fn events_after(
        &self,
        conversation_id: &str,
        after_event_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<Event>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM events
             WHERE conversation_id = ?1
               AND seq > COALESCE((SELECT seq FROM events WHERE id = ?2), 0)
             ORDER BY seq ASC LIMIT ?3",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![conversation_id, after_event_id, limit as i64])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(Self::row_to_event(row)?);
        }
        Ok(events)
    }

    /// Sets or clears the reaction of `owner_id` on an event.
    pub fn set_reaction(
        &self,
        event_id: &str,
        owner_id: &str,
        reaction: Option<ReactionKind>,
    ) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        match reaction {
            Some(kind) => {
                let (_, now_str) = now_timestamp();
                conn.execute(
                    "INSERT INTO event_reactions (event_id, owner_id, reaction, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(event_id, owner_id) DO UPDATE SET
                        reaction = excluded.reaction,
                        updated_at = excluded.updated_at",
                    params![event_id, owner_id, kind.as_str(), now_str],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM event_reactions WHERE event_id = ?1 AND owner_id = ?2",
                    params![event_id, owner_id],
                )?;
            }
        }
        Ok(())
    }

    /// Latest reactions by `owner_id` across conversations, newest first.
    pub fn recent_reactions(&self, owner_id: &str, limit: usize) -> anyhow::Result<Vec<ReactionSignal>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.event_id, e.conversation_id, r.reaction, e.content, r.updated_at
             FROM event_reactions r
             JOIN events e ON e.id = r.event_id
             WHERE r.owner_id = ?1
             ORDER BY r.updated_at DESC, r.rowid DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![owner_id, limit as i64])?;
        let mut signals = Vec::new();
        while let Some(row) = rows.next()? {
            let reaction: String = row.get(2)?;
            let reaction = match reaction.parse::<ReactionKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn!("Skipping unknown reaction value '{}'", reaction);
                    continue;
                }
            };
            signals.push(ReactionSignal {
                event_id: row.get(0)?,
                conversation_id: row.get(1)?,
                reaction,
                event_excerpt: row.get(3)?,
                updated_at: parse_datetime_safe(&row.get::<_, String>(4)?).unwrap_or_else(Utc::now),
            });
        }
        Ok(signals)
    }

    pub fn reaction_for(&self, event_id: &str, owner_id: &str) -> anyhow::Result<Option<ReactionKind>> {
        let conn = self.get_conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT reaction FROM event_reactions WHERE event_id = ?1 AND owner_id = ?2",
                params![event_id, owner_id],
                |row| row.get(0),
            )
            .optional()?;
        value.map(|v| v.parse::<ReactionKind>().map_err(anyhow::Error::from)).transpose()
    }

    fn row_to_conversation(row: &Row) -> anyhow::Result<Conversation> {
        let metadata_json: String = row.get(4)?;
        let metadata: ConversationMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| anyhow::anyhow!("Conversation metadata JSON error: {}", e))?;
        let created_at = parse_datetime_safe(&row.get::<_, String>(3)?).unwrap_or_else(|| {
            warn!("Failed parse conversation created_at");
            Utc::now()
        });
        Ok(Conversation {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            created_at,
            metadata,
        })
    }

    fn row_to_event(row: &Row) -> anyhow::Result<Event> {
        let actor: String = row.get(3)?;
        let metadata_json: String = row.get(5)?;
        let created_at: DateTime<Utc> = parse_datetime_safe(&row.get::<_, String>(8)?)
            .unwrap_or_else(|| {
                warn!("Failed parse event created_at");
                Utc::now()
            });
        Ok(Event {
            seq: row.get(0)?,
            id: row.get(1)?,
            conversation_id: row.get(2)?,
            actor: actor.parse()?,
            content: row.get(4)?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
            importance_score: row.get(6)?,
            embedding: vector::decode_opt(row.get(7)?)?,
            created_at,
        })
    }
}
