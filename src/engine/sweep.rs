//! Passive reclamation of abandoned jobs.
//!
//! There is no cancel call: a job the client walks away from simply stops
//! receiving batch calls. Its session dies by TTL in the KV store, and the
//! export file it may have left behind is deleted here once it is older
//! than the export TTL. The host invokes this periodically; the engine
//! schedules nothing itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::EngineError;

/// Deletes orphaned `*.csv` files in the export directory older than `ttl`.
/// Returns how many files were removed. A missing directory is not an
/// error; nothing has been exported yet.
pub async fn remove_stale_exports(dir: &Path, ttl: Duration) -> Result<u64, EngineError> {
    let dir: PathBuf = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        if !dir.exists() {
            return Ok(0);
        }

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| EngineError::Io(format!("Failed to read export directory: {e}")))?;

        let mut removed: u64 = 0;
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping unreadable export dir entry: {e}");
                    continue;
                }
            };

            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "csv") {
                continue;
            }

            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > ttl);

            if stale {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("failed to remove stale export {}: {e}", path.display()),
                }
            }
        }

        if removed > 0 {
            info!(removed, "swept stale export files");
        }

        Ok(removed)
    })
    .await
    .map_err(|e| EngineError::Internal(format!("Export sweep task failed: {e}")))?
}
