//! Cursor-paginated reads over an external API.
//!
//! The engine treats the cursor as an opaque string: stored verbatim,
//! passed back unchanged on the next call, never inspected. The remote
//! side may report the total lazily; it is adopted once seen.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::EngineError;
use crate::source::{Position, Record, SourceBatch};

// ─────────────────────────────────────────────────────────────────────────────
// RowFetcher Trait
// ─────────────────────────────────────────────────────────────────────────────

/// One page of items from the external source.
#[derive(Debug, Clone, Default)]
pub struct SyncPage {
    /// Items in this page.
    pub items: Vec<Record>,
    /// True if another page exists beyond `cursor`.
    pub has_more: bool,
    /// Opaque resume cursor for the next call.
    pub cursor: Option<String>,
    /// Total item count, if the remote reports it on this page.
    pub total: Option<u64>,
}

/// Trait for fetching pages from the external paginated source.
///
/// Decouples the engine from the concrete API client; the shipped HTTP
/// implementation lives in [`crate::remote`], and tests provide fakes.
pub trait RowFetcher: Send + Sync {
    /// Fetches one page. `cursor` is `None` on the first call; afterwards
    /// it is whatever the previous page handed back.
    fn fetch_page<'a>(
        &'a self,
        cursor: Option<&'a str>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<SyncPage, EngineError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// CursorSource
// ─────────────────────────────────────────────────────────────────────────────

/// Row source backed by a [`RowFetcher`].
#[derive(Clone)]
pub struct CursorSource {
    fetcher: Arc<dyn RowFetcher>,
}

impl CursorSource {
    /// Wraps a fetcher.
    pub fn new(fetcher: Arc<dyn RowFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches the page at `cursor`, mapping it into the uniform
    /// [`SourceBatch`] shape.
    pub async fn fetch(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SourceBatch, EngineError> {
        let page = self.fetcher.fetch_page(cursor, limit).await?;

        Ok(SourceBatch {
            rows: page.items,
            has_more: page.has_more,
            next: Position::Cursor(page.cursor),
            total: page.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fake fetcher that serves pre-canned pages and records the cursors it
    /// was called with.
    struct FakeFetcher {
        pages: Mutex<Vec<SyncPage>>,
        seen_cursors: Mutex<Vec<Option<String>>>,
    }

    impl FakeFetcher {
        fn new(pages: Vec<SyncPage>) -> Self {
            Self {
                pages: Mutex::new(pages),
                seen_cursors: Mutex::new(Vec::new()),
            }
        }
    }

    impl RowFetcher for FakeFetcher {
        fn fetch_page<'a>(
            &'a self,
            cursor: Option<&'a str>,
            _limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<SyncPage, EngineError>> + Send + 'a>> {
            Box::pin(async move {
                self.seen_cursors
                    .lock()
                    .unwrap()
                    .push(cursor.map(String::from));
                let mut pages = self.pages.lock().unwrap();
                if pages.is_empty() {
                    return Err(EngineError::SourceFetch("no more pages".into()));
                }
                Ok(pages.remove(0))
            })
        }
    }

    fn item(id: u32) -> Record {
        Record::from_pairs(vec![("id".into(), id.to_string())])
    }

    #[tokio::test]
    async fn cursor_passed_back_verbatim() {
        let fetcher = Arc::new(FakeFetcher::new(vec![
            SyncPage {
                items: vec![item(1)],
                has_more: true,
                cursor: Some("opaque-xyz==".into()),
                total: None,
            },
            SyncPage {
                items: vec![item(2)],
                has_more: false,
                cursor: None,
                total: Some(2),
            },
        ]));
        let source = CursorSource::new(fetcher.clone());

        let first = source.fetch(None, 100).await.unwrap();
        assert!(first.has_more);
        assert_eq!(first.next, Position::Cursor(Some("opaque-xyz==".into())));

        let second = source.fetch(first.next.cursor(), 100).await.unwrap();
        assert!(!second.has_more);
        assert_eq!(second.total, Some(2));

        let seen = fetcher.seen_cursors.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some("opaque-xyz==".to_string())]);
    }

    #[tokio::test]
    async fn total_adopted_when_reported() {
        let fetcher = Arc::new(FakeFetcher::new(vec![SyncPage {
            items: vec![item(1), item(2)],
            has_more: true,
            cursor: Some("next".into()),
            total: Some(500),
        }]));
        let source = CursorSource::new(fetcher);

        let batch = source.fetch(None, 100).await.unwrap();
        assert_eq!(batch.total, Some(500));
        assert_eq!(batch.rows.len(), 2);
    }

    #[tokio::test]
    async fn fetch_error_propagates() {
        let fetcher = Arc::new(FakeFetcher::new(vec![]));
        let source = CursorSource::new(fetcher);

        let err = source.fetch(None, 100).await.unwrap_err();
        assert!(matches!(err, EngineError::SourceFetch(_)));
    }
}
