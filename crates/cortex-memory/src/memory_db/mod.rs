//! Memory database module - SQLite-backed storage for conversations, events,
//! rolling summaries and master memory
pub mod conversation_store;
pub mod master_store;
pub mod migration;
pub mod schema;
pub mod summary_store;
pub mod vector;

pub use conversation_store::{ConversationStore, EventParams};
pub use master_store::{MasterStore, MasterUpsert, NewEvidence, UpsertOutcome};
pub use migration::MigrationManager;
pub use schema::*;
pub use summary_store::{ActiveSummaryReader, NewSummary, SummaryStore, SummaryUpdate};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Facade over the per-table stores; all share one bounded pool.
pub struct MemoryDatabase {
    pub conversations: ConversationStore,
    pub summaries: SummaryStore,
    pub master: MasterStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryDatabase {
    pub fn new(db_path: &Path, max_connections: u32) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;
                     PRAGMA synchronous = NORMAL;",
                )
            });
        let pool = Pool::builder()
            .max_size(max_connections.max(1))
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        info!("Memory database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Single pinned connection; the database lives as long as the pool.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            summaries: SummaryStore::new(Arc::clone(&pool)),
            master: MasterStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

impl ActiveSummaryReader for MemoryDatabase {
    fn active_summary(&self, conversation_id: &str) -> anyhow::Result<Option<ThreadSummary>> {
        self.summaries.get_active(conversation_id)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

/// Current time plus its stored form (RFC 3339, microseconds, `Z`).
pub(crate) fn now_timestamp() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    let text = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    (now, text)
}

pub(crate) fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    None
}
