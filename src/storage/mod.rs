//! Storage module: shared SQLite database, the generic TTL'd key/value
//! store, and job-session persistence on top of it.

mod database;
mod kv;
mod sessions;

pub use database::Database;
pub use kv::{KvStore, SqliteKvStore};
pub use sessions::{DateRange, DownloadTarget, JobKind, JobSession, SessionStore};

pub(crate) use database::current_timestamp;
