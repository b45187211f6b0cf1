//! Job orchestrator: the logical RPC surface a transport maps onto.
//!
//! Each `start`/`batch`/`complete`/`download` call is one short, independent
//! unit of work. The engine holds no in-process job state between calls;
//! everything a batch call needs is either in the session store (snapshot),
//! the stats store (counters), or the operation registry (callables, looked
//! up fresh each call). Batch calls for one token are expected to be issued
//! sequentially; concurrent calls for the same token are a documented race,
//! not a supported mode.

mod sweep;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::{process_batch, BatchResult, ItemError, Outcome};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::mapping::{is_empty_row, map_row};
use crate::registry::OperationRegistry;
use crate::source::{CsvFileSource, CursorSource, Position, Record};
use crate::stats::{OperationStats, RunStatus, StatsStore};
use crate::storage::{
    current_timestamp, Database, DateRange, DownloadTarget, JobKind, JobSession, KvStore,
    SessionStore, SqliteKvStore,
};
use crate::streaming::write_batch;

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response of `export_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStarted {
    pub token: String,
    pub total_items: u64,
    pub batch_size: usize,
}

/// Response of `export_batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportProgress {
    /// Items written so far, including this batch.
    pub processed_items: u64,
    pub total_items: u64,
    pub is_complete: bool,
    /// One-shot download reference, present on the completing batch.
    pub download_ref: Option<String>,
}

/// Response of `import_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStarted {
    pub token: String,
    pub total_items: u64,
    pub batch_size: usize,
}

/// Response of `sync_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStarted {
    pub token: String,
    pub batch_size: usize,
}

/// Response of `import_batch` / `sync_batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub errors: Vec<ItemError>,
    pub has_more: bool,
    /// Resume offset (imports).
    pub next_offset: Option<u64>,
    /// Resume cursor (syncs), passed back verbatim on the next call.
    pub next_cursor: Option<String>,
    /// Snapshot of the run's aggregate statistics after this batch.
    pub stats: OperationStats,
}

impl BatchReport {
    fn new(result: BatchResult, stats: OperationStats) -> Self {
        let (next_offset, next_cursor) = match result.next {
            Position::Offset(n) => (Some(n), None),
            Position::Cursor(c) => (None, c),
        };
        Self {
            processed: result.processed,
            created: result.created,
            updated: result.updated,
            skipped: result.skipped,
            failed: result.failed,
            errors: result.errors,
            has_more: result.has_more,
            next_offset,
            next_cursor,
            stats,
        }
    }
}

/// Result of a sweep pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Expired KV entries purged (sessions, download refs).
    pub purged_entries: u64,
    /// Orphaned export files deleted.
    pub removed_files: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// DownloadHandle
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot handle to a finished export file.
///
/// Taking the handle consumes the download reference and its job session;
/// dropping the handle deletes the file. Stream or read it, then drop.
#[derive(Debug)]
pub struct DownloadHandle {
    path: PathBuf,
}

impl DownloadHandle {
    /// The on-disk file, valid until the handle is dropped.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the file for streaming.
    pub async fn open(&self) -> Result<tokio::fs::File, EngineError> {
        tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| EngineError::Io(format!("Failed to open export file: {e}")))
    }

    /// Reads the whole file, consuming the handle (and deleting the file).
    pub async fn read(self) -> Result<Vec<u8>, EngineError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| EngineError::Io(format!("Failed to read export file: {e}")))
    }

    /// Streams the file in chunks, consuming the handle. The file is
    /// deleted when the stream is dropped.
    pub async fn into_stream(
        self,
    ) -> Result<impl Stream<Item = Result<Vec<u8>, EngineError>>, EngineError> {
        let file = self.open().await?;

        // The handle rides along inside the stream state so its Drop (and
        // the file deletion) fires when the stream is dropped.
        Ok(futures_util::stream::unfold(
            (file, Some(self)),
            |(mut file, handle)| async move {
                let mut buf = vec![0u8; 64 * 1024];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some((Ok(buf), (file, handle)))
                    }
                    Err(e) => Some((
                        Err(EngineError::Io(format!("Failed to read export file: {e}"))),
                        (file, handle),
                    )),
                }
            },
        ))
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to remove downloaded export {}: {e}", self.path.display());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// The batch-operation engine.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<OperationRegistry>,
    sessions: SessionStore,
    stats: StatsStore,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with both session and stats state in the shared
    /// SQLite database.
    pub fn new(registry: Arc<OperationRegistry>, db: Arc<Database>, config: EngineConfig) -> Self {
        let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::new(db.clone()));
        Self::with_kv(registry, kv, db, config)
    }

    /// Creates an engine with a custom KV backend (e.g. Redis) for session
    /// state, keeping stats in the database.
    pub fn with_kv(
        registry: Arc<OperationRegistry>,
        kv: Arc<dyn KvStore>,
        db: Arc<Database>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            sessions: SessionStore::new(kv),
            stats: StatsStore::new(db, config.error_capacity, config.history_capacity),
            config,
        }
    }

    /// Read access to the stats store (dashboards, monitoring).
    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// Starts an export: snapshots the filters, estimates the total, and
    /// creates the job session. A failure here leaves no session behind.
    pub async fn export_start(
        &self,
        operation: &str,
        page: &str,
        date_range: Option<DateRange>,
        filters: Value,
    ) -> Result<ExportStarted, EngineError> {
        let def = self.registry.export(operation)?;
        let query = def
            .query
            .as_deref()
            .ok_or_else(|| EngineError::MissingFetcher(operation.to_string()))?;

        let total = query.count(&filters, date_range.as_ref()).await?;

        let token = Uuid::new_v4().to_string();
        let sink_path = self
            .config
            .export_dir
            .join(format!("{operation}-{token}.csv"));
        let headers: Vec<String> = def.columns.iter().map(|c| c.field.clone()).collect();

        self.stats
            .init_run(page, operation, "export", total)
            .await?;

        let session = JobSession {
            token: token.clone(),
            kind: JobKind::Export,
            operation: operation.to_string(),
            page: page.to_string(),
            filters,
            date_range,
            total_estimate: total,
            sink_path: Some(sink_path),
            source_path: None,
            field_map: HashMap::new(),
            headers,
            created_at: current_timestamp(),
        };
        self.sessions.put(&session, self.config.export_ttl).await?;

        info!(
            "[ENGINE] export {} started: {} items, token {}",
            operation,
            total,
            redact_token(&token)
        );

        Ok(ExportStarted {
            token,
            total_items: total,
            batch_size: self.config.batch_size,
        })
    }

    /// Writes one export batch to the CSV sink. `batch_index` is zero-based;
    /// batch N covers offsets `[N*batch_size, (N+1)*batch_size)`.
    pub async fn export_batch(
        &self,
        token: &str,
        batch_index: u64,
    ) -> Result<ExportProgress, EngineError> {
        let session = self.sessions.get(token).await?;
        expect_kind(&session, JobKind::Export)?;

        let def = self.registry.export(&session.operation)?;
        let query = def
            .query
            .as_deref()
            .ok_or_else(|| EngineError::MissingFetcher(session.operation.clone()))?;

        let sink_path = session
            .sink_path
            .as_deref()
            .ok_or_else(|| EngineError::Internal("Export session has no sink path".into()))?;

        let batch_size = self.config.batch_size;
        let offset = batch_index * batch_size as u64;

        let rows = query
            .fetch(
                &session.filters,
                session.date_range.as_ref(),
                offset,
                batch_size,
            )
            .await?;

        let labels: HashMap<String, String> = def
            .columns
            .iter()
            .map(|c| (c.field.clone(), c.label.clone()))
            .collect();

        write_batch(sink_path, &rows, batch_index == 0, &session.headers, &labels).await?;

        let processed = offset + rows.len() as u64;
        let is_complete = rows.len() < batch_size || processed >= session.total_estimate;

        let result = BatchResult {
            processed: rows.len() as u64,
            total: Some(session.total_estimate),
            has_more: !is_complete,
            next: Position::Offset(processed),
            ..BatchResult::default()
        };
        self.stats
            .apply_batch(&session.page, &session.operation, &result)
            .await?;

        let download_ref = if is_complete {
            let download_ref = Uuid::new_v4().to_string();
            let target = DownloadTarget {
                token: token.to_string(),
                path: sink_path.to_path_buf(),
            };
            self.sessions
                .put_download(&download_ref, &target, self.config.export_ttl)
                .await?;
            info!(
                "[ENGINE] export complete for token {} ({} items)",
                redact_token(token),
                processed
            );
            Some(download_ref)
        } else {
            None
        };

        Ok(ExportProgress {
            processed_items: processed,
            total_items: session.total_estimate,
            is_complete,
            download_ref,
        })
    }

    /// Consumes a download reference. The returned handle deletes the file
    /// when dropped; the reference and its job session are gone immediately.
    pub async fn download(&self, download_ref: &str) -> Result<DownloadHandle, EngineError> {
        let target = self.sessions.take_download(download_ref).await?;
        Ok(DownloadHandle { path: target.path })
    }

    // ── Import ────────────────────────────────────────────────────────────────

    /// Starts an import over an uploaded CSV file with the user's field
    /// mapping. The mapping snapshot is captured here and never re-read.
    pub async fn import_start(
        &self,
        operation: &str,
        page: &str,
        file: impl Into<PathBuf>,
        field_map: HashMap<String, String>,
    ) -> Result<ImportStarted, EngineError> {
        let def = self.registry.import(operation)?;
        if def.processor.is_none() {
            return Err(EngineError::MissingProcessor(operation.to_string()));
        }

        let file: PathBuf = file.into();
        let total = CsvFileSource::new(&file).count_rows().await?;

        let source_label = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let token = Uuid::new_v4().to_string();

        self.stats
            .init_run(page, operation, &source_label, total)
            .await?;

        let session = JobSession {
            token: token.clone(),
            kind: JobKind::Import,
            operation: operation.to_string(),
            page: page.to_string(),
            filters: Value::Null,
            date_range: None,
            total_estimate: total,
            sink_path: None,
            source_path: Some(file),
            field_map,
            headers: Vec::new(),
            created_at: current_timestamp(),
        };
        self.sessions.put(&session, self.config.import_ttl).await?;

        info!(
            "[ENGINE] import {} started: {} rows, token {}",
            operation,
            total,
            redact_token(&token)
        );

        Ok(ImportStarted {
            token,
            total_items: total,
            batch_size: self.config.batch_size,
        })
    }

    /// Processes one import batch starting at the given data-row offset.
    pub async fn import_batch(&self, token: &str, offset: u64) -> Result<BatchReport, EngineError> {
        let session = self.sessions.get(token).await?;
        expect_kind(&session, JobKind::Import)?;

        let def = self.registry.import(&session.operation)?;
        let processor = def
            .processor
            .as_deref()
            .ok_or_else(|| EngineError::MissingProcessor(session.operation.clone()))?;

        let source_path = session
            .source_path
            .as_deref()
            .ok_or_else(|| EngineError::Internal("Import session has no source file".into()))?;

        let fetched = CsvFileSource::new(source_path)
            .fetch(offset, self.config.batch_size)
            .await?;

        // Empty rows are skipped before mapping; everything else is mapped
        // onto the canonical fields and handed to the processor.
        let mut items: Vec<(u64, Record)> = Vec::with_capacity(fetched.rows.len());
        let mut blank_rows: Vec<u64> = Vec::new();
        for (i, raw) in fetched.rows.iter().enumerate() {
            // Data row at `offset + i` is row `offset + i + 2` counting the header.
            let row = offset + i as u64 + 2;
            if is_empty_row(raw, &session.field_map) {
                blank_rows.push(row);
            } else {
                items.push((row, map_row(raw, &session.field_map, &def.fields)));
            }
        }

        let mut result = process_batch(&items, processor, def.pre_validate.as_deref()).await;
        for row in blank_rows {
            result.record(row, Outcome::Skipped);
        }
        result.has_more = fetched.has_more;
        result.next = fetched.next;

        let stats = self
            .stats
            .apply_batch(&session.page, &session.operation, &result)
            .await?;

        Ok(BatchReport::new(result, stats))
    }

    // ── Sync ──────────────────────────────────────────────────────────────────

    /// Starts a sync against the operation's external source. The total is
    /// unknown until the remote reports one.
    pub async fn sync_start(&self, operation: &str, page: &str) -> Result<SyncStarted, EngineError> {
        let def = self.registry.sync(operation)?;
        if def.fetcher.is_none() {
            return Err(EngineError::MissingFetcher(operation.to_string()));
        }
        if def.processor.is_none() {
            return Err(EngineError::MissingProcessor(operation.to_string()));
        }

        let token = Uuid::new_v4().to_string();

        self.stats
            .init_run(page, operation, &def.source_label, 0)
            .await?;

        let session = JobSession {
            token: token.clone(),
            kind: JobKind::Sync,
            operation: operation.to_string(),
            page: page.to_string(),
            filters: Value::Null,
            date_range: None,
            total_estimate: 0,
            sink_path: None,
            source_path: None,
            field_map: HashMap::new(),
            headers: Vec::new(),
            created_at: current_timestamp(),
        };
        self.sessions.put(&session, self.config.sync_ttl).await?;

        info!(
            "[ENGINE] sync {} started, token {}",
            operation,
            redact_token(&token)
        );

        Ok(SyncStarted {
            token,
            batch_size: self.config.batch_size,
        })
    }

    /// Processes one sync page. `cursor` is `None` on the first call, then
    /// whatever the previous report handed back, opaque either way.
    pub async fn sync_batch(
        &self,
        token: &str,
        cursor: Option<&str>,
    ) -> Result<BatchReport, EngineError> {
        let session = self.sessions.get(token).await?;
        expect_kind(&session, JobKind::Sync)?;

        let def = self.registry.sync(&session.operation)?;
        let fetcher = def
            .fetcher
            .clone()
            .ok_or_else(|| EngineError::MissingFetcher(session.operation.clone()))?;
        let processor = def
            .processor
            .as_deref()
            .ok_or_else(|| EngineError::MissingProcessor(session.operation.clone()))?;

        let fetched = CursorSource::new(fetcher)
            .fetch(cursor, self.config.batch_size)
            .await?;

        // No file rows here: items are numbered within the batch.
        let items: Vec<(u64, Record)> = fetched
            .rows
            .iter()
            .enumerate()
            .map(|(i, item)| (i as u64 + 1, item.clone()))
            .collect();

        let mut result = process_batch(&items, processor, None).await;
        result.has_more = fetched.has_more;
        result.next = fetched.next;
        result.total = fetched.total;

        let stats = self
            .stats
            .apply_batch(&session.page, &session.operation, &result)
            .await?;

        Ok(BatchReport::new(result, stats))
    }

    // ── Completion / Sweep ────────────────────────────────────────────────────

    /// Finalizes a run: freezes its counters into history with the given
    /// status and duration, removes the session, and (imports) deletes the
    /// uploaded source file.
    pub async fn complete(
        &self,
        token: &str,
        status: RunStatus,
        duration_secs: u64,
    ) -> Result<OperationStats, EngineError> {
        let session = self.sessions.get(token).await?;

        let stats = self
            .stats
            .complete_run(&session.page, &session.operation, status, duration_secs)
            .await?;

        if session.kind == JobKind::Import {
            if let Some(source_path) = &session.source_path {
                if let Err(e) = tokio::fs::remove_file(source_path).await {
                    warn!(
                        "failed to remove import source {}: {e}",
                        source_path.display()
                    );
                }
            }
        }

        self.sessions.delete(token).await?;

        info!(
            "[ENGINE] {} {} completed with status {:?}",
            session.kind.as_str(),
            session.operation,
            status
        );

        Ok(stats)
    }

    /// Purges expired sessions/download refs and deletes orphaned export
    /// files older than the export TTL.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let purged_entries = self.sessions.sweep().await?;
        let removed_files =
            sweep::remove_stale_exports(&self.config.export_dir, self.config.export_ttl).await?;

        Ok(SweepReport {
            purged_entries,
            removed_files,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// A token presented against the wrong job kind is indistinguishable from a
/// stale token from the client's point of view; both mean "restart".
fn expect_kind(session: &JobSession, kind: JobKind) -> Result<(), EngineError> {
    if session.kind == kind {
        Ok(())
    } else {
        Err(EngineError::SessionExpired)
    }
}

/// Redacts a token for logging (shows first 8 chars).
fn redact_token(token: &str) -> String {
    if token.len() > 8 {
        format!("{}...", &token[..8])
    } else {
        token.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
