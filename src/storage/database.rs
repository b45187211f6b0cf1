//! SQLite database module with schema migrations.
//!
//! Backs the externalized key/value store and the per-operation statistics.
//! A shared database file is reachable from every process handling a
//! request, so consecutive batch calls for one token may be served by
//! different server instances.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::EngineError;

/// Current schema version. Increment when adding new migrations.
const SCHEMA_VERSION: i32 = 1;

/// V1 schema: TTL'd key/value entries and per-operation statistics.
const V1_SCHEMA: &str = r#"
-- TTL'd key/value entries (job sessions, one-shot download refs)
CREATE TABLE IF NOT EXISTS kv_entries (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_entries_expires_at ON kv_entries(expires_at);

-- Per-(page, operation) statistics, surviving across runs
CREATE TABLE IF NOT EXISTS op_stats (
    page TEXT NOT NULL,
    operation TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    created INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    run_count INTEGER NOT NULL DEFAULT 0,
    last_run INTEGER NOT NULL DEFAULT 0,
    last_status TEXT NOT NULL DEFAULT 'running',
    duration_secs INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    history TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (page, operation)
);
"#;

/// SQLite database handle.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Initializes the database at the given path.
    /// Creates parent directories if needed, opens the SQLite file, and runs migrations.
    pub async fn init(db_path: PathBuf) -> Result<Self, EngineError> {
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Internal(format!("Failed to create database directory: {e}"))
                })?;
            }

            let mut conn = Connection::open(&path)
                .map_err(|e| EngineError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;
            run_migrations(&mut conn)?;

            Ok::<_, EngineError>(())
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Database init task failed: {e}")))??;

        Ok(Self { db_path })
    }

    /// Returns the database path.
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Runs a blocking closure against a fresh configured connection on the
    /// blocking pool. All storage modules go through here so every
    /// connection gets the busy timeout and WAL mode.
    pub(crate) async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Connection) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)
                .map_err(|e| EngineError::Internal(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("{op} task failed: {e}")))?
    }

    /// Simple health check: executes SELECT 1.
    pub async fn health_check(&self) -> Result<(), EngineError> {
        self.call("Health check", |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| EngineError::Internal(format!("Health check failed: {e}")))
        })
        .await
    }
}

/// Configures connection with busy timeout and WAL mode.
fn configure_connection(conn: &Connection) -> Result<(), EngineError> {
    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| EngineError::Internal(format!("Failed to set busy timeout: {e}")))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| EngineError::Internal(format!("Failed to set WAL mode: {e}")))?;

    Ok(())
}

/// Runs database migrations using PRAGMA user_version.
fn run_migrations(conn: &mut Connection) -> Result<(), EngineError> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| EngineError::Internal(format!("Failed to get schema version: {e}")))?;

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| EngineError::Internal(format!("Failed to start migration transaction: {e}")))?;

    if current_version < 1 {
        tx.execute_batch(V1_SCHEMA)
            .map_err(|e| EngineError::Internal(format!("V1 migration failed: {e}")))?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| EngineError::Internal(format!("Failed to update schema version: {e}")))?;

    tx.commit()
        .map_err(|e| EngineError::Internal(format!("Failed to commit migration: {e}")))?;

    Ok(())
}

/// Returns current unix timestamp in seconds.
pub(crate) fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db_path() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        (temp_dir, db_path)
    }

    #[tokio::test]
    async fn init_creates_db_file_and_tables() {
        let (_temp_dir, db_path) = test_db_path();

        let db = Database::init(db_path.clone())
            .await
            .expect("Failed to init database");

        assert!(db_path.exists(), "Database file should exist");

        let conn = Connection::open(&db_path).expect("Failed to open db");
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("Failed to prepare")
            .query_map([], |row| row.get(0))
            .expect("Failed to query")
            .collect::<Result<Vec<_>, _>>()
            .expect("Failed to collect");

        assert!(tables.contains(&"kv_entries".to_string()));
        assert!(tables.contains(&"op_stats".to_string()));

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("Failed to get version");
        assert_eq!(version, SCHEMA_VERSION);

        db.health_check().await.expect("Health check should pass");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (_temp_dir, db_path) = test_db_path();

        let _db1 = Database::init(db_path.clone())
            .await
            .expect("First init should succeed");

        let db2 = Database::init(db_path.clone())
            .await
            .expect("Second init should succeed");

        db2.health_check().await.expect("Health check should pass");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let db = Database::init(db_path.clone())
            .await
            .expect("Should create nested directories");

        assert!(db_path.exists());
        db.health_check().await.expect("Health check should pass");
    }
}
