//! caravan: a resumable batch-operation engine.
//!
//! Exports a filtered result set to CSV, imports rows from an uploaded CSV
//! through user-defined field mapping, and synchronizes records from an
//! external cursor-paginated API, none of which fit inside a single
//! request. A client drives the engine across many independent round trips
//! (`start`, then `batch` until the source runs dry, then `complete`) while
//! the server holds only small, TTL'd, externally-persisted session state
//! between calls.
//!
//! The engine guarantees neither exactly-once processing nor locking
//! against concurrent retries of one job: replaying a batch offset after a
//! partial failure may double-count, and batch calls for one token must be
//! issued sequentially.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use caravan::{
//!     Database, Engine, EngineConfig, ExportDefinition, OperationRegistry,
//! };
//!
//! # async fn demo(query: Arc<dyn caravan::QueryHandler>) -> Result<(), caravan::EngineError> {
//! let registry = OperationRegistry::new().register_export(
//!     ExportDefinition::new("orders")
//!         .column("id", "Order ID")
//!         .column("total", "Total")
//!         .query(query),
//! );
//!
//! let db = Arc::new(Database::init("/var/lib/app/caravan.db".into()).await?);
//! let engine = Engine::new(Arc::new(registry), db, EngineConfig::default());
//!
//! let started = engine
//!     .export_start("orders", "shop", None, serde_json::json!({"status": "paid"}))
//!     .await?;
//! let mut batch_index = 0;
//! loop {
//!     let progress = engine.export_batch(&started.token, batch_index).await?;
//!     if progress.is_complete {
//!         break;
//!     }
//!     batch_index += 1;
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod registry;
pub mod remote;
pub mod source;
pub mod stats;
pub mod storage;
pub mod streaming;

pub use batch::{BatchResult, ItemError, ItemProcessor, Outcome, PreValidator};
pub use config::{BatchSize, EngineConfig};
pub use engine::{
    BatchReport, DownloadHandle, Engine, ExportProgress, ExportStarted, ImportStarted,
    SweepReport, SyncStarted,
};
pub use error::EngineError;
pub use mapping::{FieldDef, Sanitizer};
pub use registry::{
    ColumnDef, ExportDefinition, ImportDefinition, OperationRegistry, QueryHandler,
    SyncDefinition,
};
pub use remote::HttpRowFetcher;
pub use source::{
    CsvFileSource, CursorSource, Position, Record, RowFetcher, SourceBatch, SyncPage,
};
pub use stats::{OperationStats, RunStatus, RunSummary, StatsStore};
pub use storage::{
    Database, DateRange, JobKind, JobSession, KvStore, SessionStore, SqliteKvStore,
};
