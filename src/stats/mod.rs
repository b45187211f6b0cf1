//! Per-operation run statistics: running counters, a bounded error list,
//! and a bounded history of past runs.
//!
//! One record per (host page, operation) pair, independent of any single
//! job session, surviving across runs. Counters reset at the start of each
//! run; history is preserved. Reads at any time return an eventually
//! consistent snapshot, so a dashboard never blocks a writer.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::batch::{BatchResult, ItemError};
use crate::error::EngineError;
use crate::storage::{current_timestamp, Database};

// ─────────────────────────────────────────────────────────────────────────────
// RunStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal or live status of an operation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
    Cancelled,
    Error,
}

impl RunStatus {
    /// Converts the status to its string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Error => "error",
        }
    }

    /// Parses a string into a RunStatus.
    /// Returns `Running` for unknown strings as a safe default.
    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "complete" => RunStatus::Complete,
            "cancelled" => RunStatus::Cancelled,
            "error" => RunStatus::Error,
            _ => RunStatus::Running,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Frozen summary of one finished run, kept in bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub processed: u64,
    pub total: u64,
    pub status: RunStatus,
    pub duration_secs: u64,
    pub finished_at: i64,
}

/// Live statistics for one (page, operation) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStats {
    pub page: String,
    pub operation: String,
    /// Label of the current/last run's source (file name, API label, ...).
    pub source: String,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub processed: u64,
    /// 0 until the source reports one; may be revised upward mid-run (sync).
    pub total: u64,
    pub run_count: u64,
    pub last_run: i64,
    pub last_status: RunStatus,
    pub duration_secs: u64,
    /// Bounded, oldest evicted first.
    pub errors: Vec<ItemError>,
    /// Bounded, most-recent-first.
    pub history: Vec<RunSummary>,
}

impl OperationStats {
    /// Fraction complete in [0, 1]. Uses `processed / max(total, processed)`
    /// so an underestimating total (sync) never pushes this past 1, and an
    /// unknown total never divides by zero.
    pub fn percent_complete(&self) -> f64 {
        let denom = self.total.max(self.processed);
        if denom == 0 {
            return 0.0;
        }
        self.processed as f64 / denom as f64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StatsStore
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence for [`OperationStats`], keyed by (page, operation).
#[derive(Clone)]
pub struct StatsStore {
    db: Arc<Database>,
    error_capacity: usize,
    history_capacity: usize,
}

impl StatsStore {
    pub fn new(db: Arc<Database>, error_capacity: usize, history_capacity: usize) -> Self {
        Self {
            db,
            error_capacity,
            history_capacity,
        }
    }

    /// Starts a new run: zeroes the counters, bumps `run_count`, stamps
    /// `last_run`, and stores the source label. Prior history is preserved.
    pub async fn init_run(
        &self,
        page: &str,
        operation: &str,
        source_label: &str,
        total_hint: u64,
    ) -> Result<OperationStats, EngineError> {
        let page = page.to_string();
        let operation = operation.to_string();
        let source_label = source_label.to_string();

        self.db
            .call("Stats init_run", move |conn| {
                let now = current_timestamp();

                // History is deliberately untouched on conflict: prior runs
                // survive every reset.
                conn.execute(
                    r#"
                    INSERT INTO op_stats (page, operation, source, created, updated, skipped, failed,
                                          processed, total, run_count, last_run, last_status,
                                          duration_secs, errors, history)
                    VALUES (?1, ?2, ?3, 0, 0, 0, 0, 0, ?4, 1, ?5, 'running', 0, '[]', '[]')
                    ON CONFLICT(page, operation) DO UPDATE SET
                        source = excluded.source,
                        created = 0, updated = 0, skipped = 0, failed = 0, processed = 0,
                        total = excluded.total,
                        run_count = op_stats.run_count + 1,
                        last_run = excluded.last_run,
                        last_status = 'running',
                        duration_secs = 0,
                        errors = '[]'
                    "#,
                    rusqlite::params![page, operation, source_label, total_hint, now],
                )
                .map_err(|e| EngineError::Internal(format!("Failed to init run: {e}")))?;

                read_row(conn, &page, &operation)?
                    .ok_or_else(|| EngineError::Internal("Stats row missing after init".into()))
            })
            .await
    }

    /// Folds one batch result into the run: adds counters, appends errors
    /// into the bounded list, and raises `total` if a larger value was
    /// observed.
    pub async fn apply_batch(
        &self,
        page: &str,
        operation: &str,
        result: &BatchResult,
    ) -> Result<OperationStats, EngineError> {
        let page = page.to_string();
        let operation = operation.to_string();
        let result = result.clone();
        let error_capacity = self.error_capacity;

        self.db
            .call("Stats apply_batch", move |conn| {
                let mut stats = read_row(conn, &page, &operation)?.ok_or_else(|| {
                    EngineError::NotFound(format!("No stats for {page}/{operation}"))
                })?;

                stats.created += result.created;
                stats.updated += result.updated;
                stats.skipped += result.skipped;
                stats.failed += result.failed;
                stats.processed += result.processed;

                if let Some(reported) = result.total {
                    if reported > stats.total {
                        stats.total = reported;
                    }
                }

                stats.errors.extend(result.errors.iter().cloned());
                if stats.errors.len() > error_capacity {
                    let overflow = stats.errors.len() - error_capacity;
                    stats.errors.drain(..overflow);
                }

                write_counters(conn, &stats)?;
                Ok(stats)
            })
            .await
    }

    /// Freezes the run's final counters into one history entry (prepended,
    /// truncated to capacity) and records the terminal status and duration.
    pub async fn complete_run(
        &self,
        page: &str,
        operation: &str,
        status: RunStatus,
        duration_secs: u64,
    ) -> Result<OperationStats, EngineError> {
        let page = page.to_string();
        let operation = operation.to_string();
        let history_capacity = self.history_capacity;

        self.db
            .call("Stats complete_run", move |conn| {
                let mut stats = read_row(conn, &page, &operation)?.ok_or_else(|| {
                    EngineError::NotFound(format!("No stats for {page}/{operation}"))
                })?;

                stats.last_status = status;
                stats.duration_secs = duration_secs;

                let summary = RunSummary {
                    source: stats.source.clone(),
                    created: stats.created,
                    updated: stats.updated,
                    skipped: stats.skipped,
                    failed: stats.failed,
                    processed: stats.processed,
                    total: stats.total,
                    status,
                    duration_secs,
                    finished_at: current_timestamp(),
                };

                stats.history.insert(0, summary);
                stats.history.truncate(history_capacity);

                write_counters(conn, &stats)?;
                Ok(stats)
            })
            .await
    }

    /// Reads the current snapshot, if the operation has ever run.
    pub async fn get(
        &self,
        page: &str,
        operation: &str,
    ) -> Result<Option<OperationStats>, EngineError> {
        let page = page.to_string();
        let operation = operation.to_string();

        self.db
            .call("Stats get", move |conn| read_row(conn, &page, &operation))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row Mapping
// ─────────────────────────────────────────────────────────────────────────────

fn to_json<T: Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string(value)
        .map_err(|e| EngineError::Internal(format!("Failed to serialize stats blob: {e}")))
}

fn from_json<T: for<'de> Deserialize<'de> + Default>(json: &str) -> T {
    serde_json::from_str(json).unwrap_or_else(|e| {
        // A corrupt blob loses its list, not the whole record.
        warn!("discarding unreadable stats blob: {e}");
        T::default()
    })
}

fn read_row(
    conn: &Connection,
    page: &str,
    operation: &str,
) -> Result<Option<OperationStats>, EngineError> {
    conn.query_row(
        r#"
        SELECT page, operation, source, created, updated, skipped, failed, processed,
               total, run_count, last_run, last_status, duration_secs, errors, history
        FROM op_stats
        WHERE page = ?1 AND operation = ?2
        "#,
        [page, operation],
        |row| {
            let status_str: String = row.get(11)?;
            let errors_json: String = row.get(13)?;
            let history_json: String = row.get(14)?;
            Ok(OperationStats {
                page: row.get(0)?,
                operation: row.get(1)?,
                source: row.get(2)?,
                created: row.get::<_, i64>(3)? as u64,
                updated: row.get::<_, i64>(4)? as u64,
                skipped: row.get::<_, i64>(5)? as u64,
                failed: row.get::<_, i64>(6)? as u64,
                processed: row.get::<_, i64>(7)? as u64,
                total: row.get::<_, i64>(8)? as u64,
                run_count: row.get::<_, i64>(9)? as u64,
                last_run: row.get(10)?,
                last_status: RunStatus::from_str(&status_str),
                duration_secs: row.get::<_, i64>(12)? as u64,
                errors: from_json(&errors_json),
                history: from_json(&history_json),
            })
        },
    )
    .optional()
    .map_err(|e| EngineError::Internal(format!("Failed to query stats: {e}")))
}

fn write_counters(conn: &Connection, stats: &OperationStats) -> Result<(), EngineError> {
    let errors_json = to_json(&stats.errors)?;
    let history_json = to_json(&stats.history)?;

    conn.execute(
        r#"
        UPDATE op_stats
        SET created = ?1, updated = ?2, skipped = ?3, failed = ?4, processed = ?5,
            total = ?6, last_status = ?7, duration_secs = ?8, errors = ?9, history = ?10
        WHERE page = ?11 AND operation = ?12
        "#,
        rusqlite::params![
            stats.created as i64,
            stats.updated as i64,
            stats.skipped as i64,
            stats.failed as i64,
            stats.processed as i64,
            stats.total as i64,
            stats.last_status.as_str(),
            stats.duration_secs as i64,
            errors_json,
            history_json,
            stats.page,
            stats.operation,
        ],
    )
    .map_err(|e| EngineError::Internal(format!("Failed to update stats: {e}")))?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
