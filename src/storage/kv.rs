//! Generic TTL'd key/value store.
//!
//! The engine never talks to the database directly for session state: it
//! goes through [`KvStore`], so any process-external cache (Redis, a
//! database table, a cloud KV) can stand in. The shipped backend is a
//! SQLite table.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::OptionalExtension;
use tracing::debug;

use crate::error::EngineError;
use crate::storage::database::{current_timestamp, Database};

// ─────────────────────────────────────────────────────────────────────────────
// KvStore Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Process-external key/value store with per-entry TTL.
///
/// Expired entries must report as absent from `get`; whether they are
/// physically removed lazily or by `sweep` is a backend detail.
pub trait KvStore: Send + Sync {
    /// Stores `value` under `key`, expiring after `ttl`.
    fn put<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

    /// Returns the live value under `key`, or `None` if absent or expired.
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, EngineError>> + Send + 'a>>;

    /// Removes `key`. Removing a missing key is not an error.
    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

    /// Purges expired entries, returning how many were removed.
    fn sweep<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EngineError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteKvStore
// ─────────────────────────────────────────────────────────────────────────────

/// [`KvStore`] backed by the shared SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    db: Arc<Database>,
}

impl SqliteKvStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl KvStore for SqliteKvStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        let key = key.to_string();
        let value = value.to_string();
        let expires_at = current_timestamp() + ttl.as_secs() as i64;

        Box::pin(async move {
            self.db
                .call("KV put", move |conn| {
                    conn.execute(
                        r#"
                        INSERT INTO kv_entries (key, value, expires_at)
                        VALUES (?1, ?2, ?3)
                        ON CONFLICT(key) DO UPDATE SET
                            value = excluded.value,
                            expires_at = excluded.expires_at
                        "#,
                        rusqlite::params![key, value, expires_at],
                    )
                    .map_err(|e| EngineError::Internal(format!("Failed to put kv entry: {e}")))?;

                    Ok(())
                })
                .await
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, EngineError>> + Send + 'a>> {
        let key = key.to_string();

        Box::pin(async move {
            self.db
                .call("KV get", move |conn| {
                    let now = current_timestamp();

                    let row: Option<(String, i64)> = conn
                        .query_row(
                            "SELECT value, expires_at FROM kv_entries WHERE key = ?1",
                            [&key],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()
                        .map_err(|e| {
                            EngineError::Internal(format!("Failed to get kv entry: {e}"))
                        })?;

                    match row {
                        Some((_, expires_at)) if expires_at <= now => {
                            // Lazy expiry: the entry is dead, drop it now.
                            conn.execute("DELETE FROM kv_entries WHERE key = ?1", [&key])
                                .map_err(|e| {
                                    EngineError::Internal(format!(
                                        "Failed to delete expired kv entry: {e}"
                                    ))
                                })?;
                            debug!(key = %key, "kv entry expired");
                            Ok(None)
                        }
                        Some((value, _)) => Ok(Some(value)),
                        None => Ok(None),
                    }
                })
                .await
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        let key = key.to_string();

        Box::pin(async move {
            self.db
                .call("KV delete", move |conn| {
                    conn.execute("DELETE FROM kv_entries WHERE key = ?1", [&key])
                        .map_err(|e| {
                            EngineError::Internal(format!("Failed to delete kv entry: {e}"))
                        })?;
                    Ok(())
                })
                .await
        })
    }

    fn sweep<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.db
                .call("KV sweep", move |conn| {
                    let now = current_timestamp();
                    let purged = conn
                        .execute("DELETE FROM kv_entries WHERE expires_at <= ?1", [now])
                        .map_err(|e| {
                            EngineError::Internal(format!("Failed to sweep kv entries: {e}"))
                        })?;
                    Ok(purged as u64)
                })
                .await
        })
    }
}
