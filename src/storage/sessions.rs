//! Job sessions: the small, externally-persisted state a client resumes a
//! batch operation from.
//!
//! A session is written once by `start`, read on every batch call, and
//! removed by completion, download, or TTL expiry. It is never mutated in
//! place; the running counters live in the stats store, not here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::storage::kv::KvStore;

// ─────────────────────────────────────────────────────────────────────────────
// JobKind / DateRange
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of batch job a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Export,
    Import,
    Sync,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Export => "export",
            JobKind::Import => "import",
            JobKind::Sync => "sync",
        }
    }
}

/// Inclusive date window captured at start time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// JobSession
// ─────────────────────────────────────────────────────────────────────────────

/// One in-flight export/import/sync job.
///
/// The filter/date/mapping snapshot is captured at `start` and never re-read
/// from later requests. Operation descriptors (processors, fetchers) are
/// looked up fresh from the registry on every call; only the operation
/// name is stored here, never a callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSession {
    /// Opaque unique id; also the lookup key.
    pub token: String,
    pub kind: JobKind,
    /// Name of the configured operation definition.
    pub operation: String,
    /// Host page the operation belongs to; half of the stats key.
    pub page: String,
    /// Filter snapshot, opaque to the engine.
    #[serde(default)]
    pub filters: Value,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    /// May be 0 (unknown) at start for sync jobs.
    pub total_estimate: u64,
    /// Destination CSV path (export only).
    #[serde(default)]
    pub sink_path: Option<PathBuf>,
    /// Uploaded source CSV path (import only).
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    /// Canonical-field → CSV-column mapping, captured once (import only).
    #[serde(default)]
    pub field_map: HashMap<String, String>,
    /// Resolved output column order, fixed at start (export only).
    #[serde(default)]
    pub headers: Vec<String>,
    pub created_at: i64,
}

/// Target of a one-shot download reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTarget {
    /// The job session the file belongs to.
    pub token: String,
    pub path: PathBuf,
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionStore
// ─────────────────────────────────────────────────────────────────────────────

/// JSON (de)serialization and key layout on top of a [`KvStore`].
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn job_key(token: &str) -> String {
        format!("job:{token}")
    }

    fn download_key(download_ref: &str) -> String {
        format!("download:{download_ref}")
    }

    /// Persists a new session under its token.
    pub async fn put(&self, session: &JobSession, ttl: Duration) -> Result<(), EngineError> {
        let json = serde_json::to_string(session)
            .map_err(|e| EngineError::Internal(format!("Failed to serialize session: {e}")))?;
        self.kv.put(&Self::job_key(&session.token), &json, ttl).await
    }

    /// Loads a session. An unknown or expired token is the recoverable
    /// [`EngineError::SessionExpired`]: the user walked away, and nothing is
    /// mutated.
    pub async fn get(&self, token: &str) -> Result<JobSession, EngineError> {
        let json = self
            .kv
            .get(&Self::job_key(token))
            .await?
            .ok_or(EngineError::SessionExpired)?;

        serde_json::from_str(&json)
            .map_err(|e| EngineError::Internal(format!("Failed to deserialize session: {e}")))
    }

    /// Removes a session.
    pub async fn delete(&self, token: &str) -> Result<(), EngineError> {
        self.kv.delete(&Self::job_key(token)).await
    }

    /// Registers a one-shot download reference pointing at a finished
    /// export file.
    pub async fn put_download(
        &self,
        download_ref: &str,
        target: &DownloadTarget,
        ttl: Duration,
    ) -> Result<(), EngineError> {
        let json = serde_json::to_string(target).map_err(|e| {
            EngineError::Internal(format!("Failed to serialize download target: {e}"))
        })?;
        self.kv
            .put(&Self::download_key(download_ref), &json, ttl)
            .await
    }

    /// Consumes a download reference: returns its target and removes both
    /// the reference and the owning job session. Second calls fail.
    pub async fn take_download(&self, download_ref: &str) -> Result<DownloadTarget, EngineError> {
        let key = Self::download_key(download_ref);
        let json = self
            .kv
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Download ref {download_ref}")))?;

        let target: DownloadTarget = serde_json::from_str(&json).map_err(|e| {
            EngineError::Internal(format!("Failed to deserialize download target: {e}"))
        })?;

        self.kv.delete(&key).await?;
        self.kv.delete(&Self::job_key(&target.token)).await?;

        Ok(target)
    }

    /// Purges expired entries from the backing store.
    pub async fn sweep(&self) -> Result<u64, EngineError> {
        self.kv.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::Database;
    use crate::storage::kv::SqliteKvStore;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SessionStore) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::init(temp_dir.path().join("test.db"))
            .await
            .expect("Failed to init DB");
        let kv = Arc::new(SqliteKvStore::new(Arc::new(db)));
        (temp_dir, SessionStore::new(kv))
    }

    fn sample_session(token: &str) -> JobSession {
        JobSession {
            token: token.to_string(),
            kind: JobKind::Import,
            operation: "contacts".to_string(),
            page: "crm".to_string(),
            filters: serde_json::json!({"status": "active"}),
            date_range: Some(DateRange {
                from: Some("2026-01-01".into()),
                to: None,
            }),
            total_estimate: 1200,
            sink_path: None,
            source_path: Some(PathBuf::from("/uploads/contacts.csv")),
            field_map: HashMap::from([("email".to_string(), "E-Mail".to_string())]),
            headers: vec![],
            created_at: 1_750_000_000,
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_snapshot() {
        let (_tmp, store) = test_store().await;
        let session = sample_session("tok-1");

        store
            .put(&session, Duration::from_secs(3600))
            .await
            .unwrap();
        let loaded = store.get("tok-1").await.unwrap();

        assert_eq!(loaded.token, "tok-1");
        assert_eq!(loaded.kind, JobKind::Import);
        assert_eq!(loaded.operation, "contacts");
        assert_eq!(loaded.filters["status"], "active");
        assert_eq!(loaded.field_map.get("email").unwrap(), "E-Mail");
        assert_eq!(loaded.total_estimate, 1200);
    }

    #[tokio::test]
    async fn unknown_token_is_session_expired() {
        let (_tmp, store) = test_store().await;
        let err = store.get("never-started").await.unwrap_err();
        assert!(matches!(err, EngineError::SessionExpired));
    }

    #[tokio::test]
    async fn ttl_elapsed_is_session_expired() {
        let (_tmp, store) = test_store().await;
        let session = sample_session("tok-ttl");

        store.put(&session, Duration::from_secs(0)).await.unwrap();

        let err = store.get("tok-ttl").await.unwrap_err();
        assert!(matches!(err, EngineError::SessionExpired));
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let (_tmp, store) = test_store().await;
        let session = sample_session("tok-del");

        store
            .put(&session, Duration::from_secs(3600))
            .await
            .unwrap();
        store.delete("tok-del").await.unwrap();

        assert!(matches!(
            store.get("tok-del").await.unwrap_err(),
            EngineError::SessionExpired
        ));
    }

    #[tokio::test]
    async fn download_ref_is_one_shot() {
        let (_tmp, store) = test_store().await;
        let session = sample_session("tok-dl");
        store
            .put(&session, Duration::from_secs(3600))
            .await
            .unwrap();

        let target = DownloadTarget {
            token: "tok-dl".to_string(),
            path: PathBuf::from("/exports/tok-dl.csv"),
        };
        store
            .put_download("ref-1", &target, Duration::from_secs(3600))
            .await
            .unwrap();

        let taken = store.take_download("ref-1").await.unwrap();
        assert_eq!(taken.path, PathBuf::from("/exports/tok-dl.csv"));

        // The ref is consumed and the owning session is gone with it.
        assert!(matches!(
            store.take_download("ref-1").await.unwrap_err(),
            EngineError::NotFound(_)
        ));
        assert!(matches!(
            store.get("tok-dl").await.unwrap_err(),
            EngineError::SessionExpired
        ));
    }
}
