//! SQLite Database
//!
//! Embedded database for persistent storage using rusqlite with r2d2
//! connection pooling. One database file per project holds the memory
//! item table and the relation table.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::utils::error::{AppError, AppResult};

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

/// Per-connection pragmas. WAL journaling lets readers proceed alongside
/// a single writer; write-write contention is left to SQLite's own
/// locking plus the busy timeout.
fn configure_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", 5000);
    let _ = conn.pragma_update(None, "foreign_keys", "ON");
    Ok(())
}

impl Database {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an in-memory database for testing.
    ///
    /// Uses an in-memory SQLite database with the same schema as the
    /// production database. Pool size is pinned to 1 so every caller
    /// sees the same in-memory instance.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) the database file at the given path.
    ///
    /// Creating the parent directory or opening the file can fail; those
    /// errors propagate so the caller can decide whether to abort or
    /// retry. This is the only point where the engine raises I/O errors.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        // Memory item table. Column names are part of the on-disk
        // contract shared with other readers of these files.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memories (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'general',
                timestamp TEXT NOT NULL,
                lastAccessed TEXT NOT NULL,
                priority INTEGER DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories(timestamp)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_priority ON memories(priority)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_last_accessed ON memories(lastAccessed)",
            [],
        )?;

        // Relation table. The (sourceKey, targetKey, relationType)
        // uniqueness makes re-linking an upsert rather than a duplicate
        // edge. Endpoints are not foreign keys; cascade deletion is the
        // item store's responsibility.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memory_relations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sourceKey TEXT,
                targetKey TEXT,
                relationType TEXT,
                strength REAL DEFAULT 1.0,
                metadata TEXT,
                timestamp TEXT,
                UNIQUE(sourceKey, targetKey, relationType)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_source ON memory_relations(sourceKey)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_target ON memory_relations(targetKey)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_type ON memory_relations(relationType)",
            [],
        )?;

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Get the connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Check if the database is healthy
    pub fn is_healthy(&self) -> bool {
        if let Ok(conn) = self.pool.get() {
            conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &Database) -> Vec<String> {
        let conn = db.get_connection().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_in_memory_schema() {
        let db = Database::new_in_memory().unwrap();
        let tables = table_names(&db);
        assert!(tables.contains(&"memories".to_string()));
        assert!(tables.contains(&"memory_relations".to_string()));
    }

    #[test]
    fn test_is_healthy() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.is_healthy());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("memory.db");
        let db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(db.is_healthy());
    }

    #[test]
    fn test_open_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("memory.db");
        {
            let db = Database::open(&db_path).unwrap();
            let conn = db.get_connection().unwrap();
            conn.execute(
                "INSERT INTO memories (key, value, timestamp, lastAccessed)
                 VALUES ('k', 'v', '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
        }
        // Re-opening must not clobber existing rows
        let db = Database::open(&db_path).unwrap();
        let conn = db.get_connection().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
