//! Project Memory Store
//!
//! Core CRUD operations for the project memory system. Each project owns
//! one SQLite file of keyed memory items; relations and search layer on
//! top of this store's connection pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::storage::database::{Database, DbPool};
use crate::utils::error::AppResult;
use crate::utils::paths;

/// Category applied when a caller does not supply one
pub const DEFAULT_CATEGORY: &str = "general";

/// Columns selected for every `MemoryItem` read, in `row_to_memory_item`
/// order.
pub(crate) const ITEM_COLUMNS: &str =
    "key, value, category, timestamp, lastAccessed, priority";

// ============================================================================
// Data Types
// ============================================================================

/// A single memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    pub key: String,
    pub value: String,
    pub category: String,
    pub timestamp: String,
    pub last_accessed: String,
    pub priority: i64,
}

/// Aggregate statistics for a store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
}

/// One record of the legacy flat-file store. Field names match the
/// persisted column names; absent fields fall back to item defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    key: String,
    value: String,
    #[serde(default = "default_item_category")]
    category: String,
    #[serde(default)]
    priority: i64,
    timestamp: Option<String>,
    last_accessed: Option<String>,
}

fn default_item_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Current instant as an ISO-8601 string. Lexicographic order of these
/// strings matches chronological order, which the timestamp-ordered
/// queries rely on.
pub(crate) fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// ProjectMemoryStore
// ============================================================================

/// Durable key-value store for one project's memory items
pub struct ProjectMemoryStore {
    pool: DbPool,
}

impl ProjectMemoryStore {
    /// Open (or create) the store for a project directory.
    ///
    /// Creates the storage directory and database file if absent, then
    /// attempts a one-shot import of the legacy flat-file store sitting
    /// next to the database. A failed import never blocks construction:
    /// it is logged and the legacy file is left in place so a later open
    /// can retry.
    pub fn open(project_dir: &Path) -> AppResult<Self> {
        let db = Database::open(&paths::database_path(project_dir))?;
        let store = Self::from_database(&db);
        store.import_legacy_store(&paths::legacy_store_path(project_dir));
        Ok(store)
    }

    /// Create a store from an existing `Database` instance
    pub fn from_database(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    // ========================================================================
    // Write Operations
    // ========================================================================

    /// Insert or fully replace an item.
    ///
    /// This is a full upsert: on an existing key the value, category and
    /// priority are all overwritten, and both timestamps reset. Callers
    /// that want to touch the value alone must use [`update`].
    ///
    /// [`update`]: ProjectMemoryStore::update
    pub fn save(&self, key: &str, value: &str, category: &str, priority: i64) -> AppResult<()> {
        let now = now_utc();
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO memories (key, value, category, timestamp, lastAccessed, priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                 value = ?2, category = ?3, timestamp = ?4, lastAccessed = ?5, priority = ?6",
            params![key, value, category, now, now, priority],
        )?;
        Ok(())
    }

    /// Replace an existing item's value, refreshing its timestamp.
    ///
    /// Returns `false` without writing if the key does not exist; unlike
    /// [`save`], this never creates a row.
    ///
    /// [`save`]: ProjectMemoryStore::save
    pub fn update(&self, key: &str, value: &str) -> AppResult<bool> {
        let now = now_utc();
        let conn = self.get_connection()?;
        let rows = conn.execute(
            "UPDATE memories SET value = ?2, timestamp = ?3 WHERE key = ?1",
            params![key, value, now],
        )?;
        Ok(rows > 0)
    }

    /// Change an item's priority. Returns whether the key existed.
    pub fn set_priority(&self, key: &str, priority: i64) -> AppResult<bool> {
        let conn = self.get_connection()?;
        let rows = conn.execute(
            "UPDATE memories SET priority = ?2 WHERE key = ?1",
            params![key, priority],
        )?;
        Ok(rows > 0)
    }

    /// Delete an item and every relation where it appears as source or
    /// target, in one transaction. Returns whether the item existed.
    ///
    /// The relation sweep runs first so the relation table never outlives
    /// its endpoints through this API.
    pub fn delete(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM memory_relations WHERE sourceKey = ?1 OR targetKey = ?1",
            params![key],
        )?;
        let rows = tx.execute("DELETE FROM memories WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    /// Delete every item and relation in the store, returning the number
    /// of items removed.
    pub fn clear(&self) -> AppResult<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_relations", [])?;
        let count = tx.execute("DELETE FROM memories", [])?;
        tx.commit()?;
        Ok(count)
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    /// Look up an item and refresh its `lastAccessed` stamp.
    ///
    /// The read and the stamp update run inside one transaction, so the
    /// pair is atomic within a single handle. Across independent handles
    /// on the same file the bump can still be lost to a concurrent
    /// writer; that window is accepted rather than closed with external
    /// locking.
    pub fn recall(&self, key: &str) -> AppResult<Option<MemoryItem>> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let item = {
            let result = tx.query_row(
                &format!("SELECT {} FROM memories WHERE key = ?1", ITEM_COLUMNS),
                params![key],
                row_to_memory_item,
            );
            match result {
                Ok(item) => item,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };

        let now = now_utc();
        tx.execute(
            "UPDATE memories SET lastAccessed = ?2 WHERE key = ?1",
            params![key, now],
        )?;
        tx.commit()?;

        Ok(Some(MemoryItem {
            last_accessed: now,
            ..item
        }))
    }

    /// List items, optionally filtered to one category, ordered by
    /// priority descending then timestamp descending.
    pub fn list(&self, category: Option<&str>) -> AppResult<Vec<MemoryItem>> {
        let conn = self.get_connection()?;

        if let Some(category) = category {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memories WHERE category = ?1
                 ORDER BY priority DESC, timestamp DESC",
                ITEM_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![category], row_to_memory_item)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memories ORDER BY priority DESC, timestamp DESC",
                ITEM_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], row_to_memory_item)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        }
    }

    /// Substring search against key or value.
    ///
    /// Matching uses SQL `LIKE`, so it is ASCII case-insensitive; the
    /// query is used as a raw infix with no wildcard escaping. An empty
    /// query matches every row. Both behaviors are part of the search
    /// contract shared with the retrieval strategies.
    pub fn search(&self, query: &str) -> AppResult<Vec<MemoryItem>> {
        let conn = self.get_connection()?;
        let pattern = format!("%{}%", query);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories WHERE key LIKE ?1 OR value LIKE ?1
             ORDER BY priority DESC, timestamp DESC",
            ITEM_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![pattern], row_to_memory_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Items with exactly the given priority, newest first
    pub fn get_by_priority(&self, priority: i64) -> AppResult<Vec<MemoryItem>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories WHERE priority = ?1 ORDER BY timestamp DESC",
            ITEM_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![priority], row_to_memory_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Items within an inclusive timestamp range, newest first, capped
    /// at `limit`.
    pub fn get_timeline(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<MemoryItem>> {
        let conn = self.get_connection()?;

        let limit = limit as i64;
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(ref start) = start {
            clauses.push("timestamp >= ?");
            args.push(start);
        }
        if let Some(ref end) = end {
            clauses.push("timestamp <= ?");
            args.push(end);
        }

        let mut sql = format!("SELECT {} FROM memories", ITEM_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        args.push(&limit);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_memory_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Number of items in the store
    pub fn count(&self) -> AppResult<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Aggregate statistics: total item count plus per-category counts
    pub fn get_stats(&self) -> AppResult<MemoryStats> {
        let conn = self.get_connection()?;

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;

        let mut stmt =
            conn.prepare("SELECT category, COUNT(*) FROM memories GROUP BY category")?;
        let by_category: HashMap<String, usize> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(MemoryStats {
            total: total as usize,
            by_category,
        })
    }

    // ========================================================================
    // Legacy import
    // ========================================================================

    /// Import the legacy flat-file store if one exists.
    ///
    /// Best-effort: any failure is logged and swallowed so construction
    /// always proceeds. On success the legacy file is renamed with a
    /// `.backup` suffix; on failure it stays put and the upsert-based
    /// import keeps the whole step idempotent across retries.
    fn import_legacy_store(&self, legacy_path: &Path) {
        if !legacy_path.exists() {
            return;
        }
        match self.try_import_legacy(legacy_path) {
            Ok(count) => {
                tracing::info!(path = %legacy_path.display(), count, "Imported legacy memory store");
            }
            Err(e) => {
                tracing::warn!(
                    path = %legacy_path.display(),
                    error = %e,
                    "Legacy memory import failed, leaving file for a later attempt"
                );
            }
        }
    }

    fn try_import_legacy(&self, legacy_path: &Path) -> AppResult<usize> {
        let raw = std::fs::read_to_string(legacy_path)?;
        let records: Vec<LegacyRecord> = serde_json::from_str(&raw)?;

        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        for record in &records {
            let timestamp = record.timestamp.clone().unwrap_or_else(now_utc);
            let last_accessed = record
                .last_accessed
                .clone()
                .unwrap_or_else(|| timestamp.clone());
            tx.execute(
                "INSERT INTO memories (key, value, category, timestamp, lastAccessed, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                     value = ?2, category = ?3, timestamp = ?4, lastAccessed = ?5, priority = ?6",
                params![
                    record.key,
                    record.value,
                    record.category,
                    timestamp,
                    last_accessed,
                    record.priority,
                ],
            )?;
        }
        tx.commit()?;

        let backup = PathBuf::from(format!("{}.backup", legacy_path.display()));
        std::fs::rename(legacy_path, backup)?;
        Ok(records.len())
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Get a connection from the pool
    fn get_connection(
        &self,
    ) -> AppResult<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            crate::utils::error::AppError::database(format!("Failed to get connection: {}", e))
        })
    }

    /// Get access to the connection pool (used by the relation graph and
    /// the retrieval layer)
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl std::fmt::Debug for ProjectMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectMemoryStore").finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Convert a database row to a MemoryItem (column order: `ITEM_COLUMNS`)
pub(crate) fn row_to_memory_item(row: &rusqlite::Row) -> rusqlite::Result<MemoryItem> {
    Ok(MemoryItem {
        key: row.get(0)?,
        value: row.get(1)?,
        category: row.get(2)?,
        timestamp: row.get(3)?,
        last_accessed: row.get(4)?,
        priority: row.get(5)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
