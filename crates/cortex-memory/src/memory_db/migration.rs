//! Database migration system

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{error, info, warn};

use crate::memory_db::schema;

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create the version table if needed and apply every pending migration.
    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current database schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![(1, include_str!("migrations/001_initial.sql"))]
}

/// Row counts and on-disk size. Only reads.
pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap_or_else(|e| {
            warn!("Stats query failed ({}): {}", sql, e);
            0
        })
    }

    Ok(schema::DatabaseStats {
        total_conversations: count(conn, "SELECT COUNT(*) FROM conversations"),
        total_events: count(conn, "SELECT COUNT(*) FROM events"),
        total_summaries: count(conn, "SELECT COUNT(*) FROM thread_summaries"),
        active_summaries: count(conn, "SELECT COUNT(*) FROM thread_summaries WHERE is_active = 1"),
        total_master_items: count(conn, "SELECT COUNT(*) FROM master_items"),
        total_evidence: count(conn, "SELECT COUNT(*) FROM master_evidence"),
        database_size_bytes: count(
            conn,
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        {
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database().unwrap();
            migrator.initialize_database().unwrap();
            assert_eq!(migrator.get_current_version().unwrap(), 1);
            assert!(migrator.has_migration_applied(1).unwrap());
            assert!(!migrator.has_migration_applied(2).unwrap());
        }
        let stats = get_database_stats(&conn).unwrap();
        assert_eq!(stats.total_events, 0);
    }

    #[test]
    fn test_evidence_requires_a_pointer() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();
        conn.execute(
            "INSERT INTO master_items (id, owner_id, bucket, text, norm_text, last_seen_at,
             last_reinforced_at, created_at, updated_at)
             VALUES ('m1', 'u1', 'PROFILE', 'x', 'x', 'now', 'now', 'now', 'now')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO master_evidence (id, master_item_id, created_at) VALUES ('e1', 'm1', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
