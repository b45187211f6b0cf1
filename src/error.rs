use thiserror::Error;

/// Engine-wide error type.
///
/// Structural errors (missing configuration, expired sessions) are returned
/// as distinct variants the caller can match on; per-item processing errors
/// are never surfaced here; they are folded into the bounded error list of
/// the run's statistics.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Sessions ──────────────────────────────────────────────────────────────
    /// The job token is unknown or its session has passed its TTL.
    /// Recoverable: the client must restart the job from `start`.
    #[error("Job session expired or unknown")]
    SessionExpired,

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Unknown operation: {0}")]
    InvalidOperation(String),

    #[error("Operation {0} has no item processor configured")]
    MissingProcessor(String),

    #[error("Operation {0} has no row fetcher configured")]
    MissingFetcher(String),

    // ── Row source ────────────────────────────────────────────────────────────
    /// The file read or external API call backing a batch failed. Fatal for
    /// that batch call only; prior batches' progress and written rows remain
    /// valid and the same batch may be retried.
    #[error("Source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Rate limited by remote source")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── File / CSV ────────────────────────────────────────────────────────────
    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    #[error("I/O error: {0}")]
    Io(String),

    // ── Lookup ────────────────────────────────────────────────────────────────
    #[error("Not found: {0}")]
    NotFound(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True if the caller can make progress by retrying the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::SourceFetch(_) | EngineError::RateLimited { .. }
        )
    }

    /// True if the job must be restarted from `start` (session gone).
    pub fn requires_restart(&self) -> bool {
        matches!(self, EngineError::SessionExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(EngineError::SourceFetch("timeout".into()).is_retryable());
        assert!(EngineError::RateLimited {
            retry_after_secs: Some(30)
        }
        .is_retryable());
        assert!(!EngineError::SessionExpired.is_retryable());
        assert!(!EngineError::InvalidOperation("orders".into()).is_retryable());
    }

    #[test]
    fn expired_session_requires_restart() {
        assert!(EngineError::SessionExpired.requires_restart());
        assert!(!EngineError::Io("disk full".into()).requires_restart());
    }

    #[test]
    fn messages_name_the_operation() {
        let e = EngineError::MissingProcessor("orders".into());
        assert!(e.to_string().contains("orders"));
        let e = EngineError::InvalidOperation("customers".into());
        assert!(e.to_string().contains("customers"));
    }
}
