//! Engine configuration.
//!
//! All tunables in one place: batch sizing, session TTLs, bounded-list
//! capacities, and the directory export files are written into.

use std::path::PathBuf;
use std::time::Duration;

/// Batch size presets for export/import/sync slices.
#[derive(Debug, Clone, Copy)]
pub enum BatchSize {
    /// 10 items per batch
    ExtraSmall,
    /// 100 items per batch (default)
    Standard,
    /// 500 items per batch
    Large,
    /// Custom item count
    Custom(u32),
}

impl BatchSize {
    /// Returns the batch size as a usize.
    pub fn as_usize(self) -> usize {
        match self {
            BatchSize::ExtraSmall => 10,
            BatchSize::Standard => 100,
            BatchSize::Large => 500,
            BatchSize::Custom(n) => n as usize,
        }
    }
}

impl From<BatchSize> for usize {
    fn from(batch_size: BatchSize) -> Self {
        batch_size.as_usize()
    }
}

/// Configuration for the batch engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Items pulled from the row source per batch call.
    pub batch_size: usize,
    /// TTL for export sessions (bounded CSV generation window).
    pub export_ttl: Duration,
    /// TTL for import sessions (large uploads may pause mid-mapping).
    pub import_ttl: Duration,
    /// TTL for sync sessions.
    pub sync_ttl: Duration,
    /// Maximum per-run error entries retained; oldest evicted first.
    pub error_capacity: usize,
    /// Maximum past-run summaries retained; most-recent-first.
    pub history_capacity: usize,
    /// Directory export CSV files are written into, partitioned by token.
    pub export_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::Standard.as_usize(),
            export_ttl: Duration::from_secs(60 * 60),
            import_ttl: Duration::from_secs(24 * 60 * 60),
            sync_ttl: Duration::from_secs(60 * 60),
            error_capacity: 50,
            history_capacity: 20,
            export_dir: std::env::temp_dir().join("caravan_exports"),
        }
    }
}

impl EngineConfig {
    /// Creates a config with the given batch size preset.
    pub fn with_batch_size(batch_size: BatchSize) -> Self {
        Self {
            batch_size: batch_size.as_usize(),
            ..Self::default()
        }
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Sets the export session TTL.
    pub fn export_ttl(mut self, ttl: Duration) -> Self {
        self.export_ttl = ttl;
        self
    }

    /// Sets the import session TTL.
    pub fn import_ttl(mut self, ttl: Duration) -> Self {
        self.import_ttl = ttl;
        self
    }

    /// Sets the sync session TTL.
    pub fn sync_ttl(mut self, ttl: Duration) -> Self {
        self.sync_ttl = ttl;
        self
    }

    /// Sets the error list capacity.
    pub fn error_capacity(mut self, n: usize) -> Self {
        self.error_capacity = n;
        self
    }

    /// Sets the run history capacity.
    pub fn history_capacity(mut self, n: usize) -> Self {
        self.history_capacity = n;
        self
    }

    /// Sets the export output directory.
    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_variants() {
        assert_eq!(BatchSize::ExtraSmall.as_usize(), 10);
        assert_eq!(BatchSize::Standard.as_usize(), 100);
        assert_eq!(BatchSize::Large.as_usize(), 500);
        assert_eq!(BatchSize::Custom(250).as_usize(), 250);
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.export_ttl, Duration::from_secs(3600));
        assert_eq!(config.import_ttl, Duration::from_secs(86400));
        assert_eq!(config.error_capacity, 50);
        assert_eq!(config.history_capacity, 20);
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::with_batch_size(BatchSize::ExtraSmall)
            .error_capacity(5)
            .history_capacity(3)
            .export_dir("/tmp/out");

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.error_capacity, 5);
        assert_eq!(config.history_capacity, 3);
        assert_eq!(config.export_dir, PathBuf::from("/tmp/out"));
    }
}
