//! HTTP client for the external cursor-paginated API.
//!
//! Fetches one JSON page per call: `GET {endpoint}?limit=N[&cursor=...]`,
//! expecting `{items, has_more, cursor, total}`. The cursor is treated as an
//! opaque string and echoed back on the next call.
//!
//! # Security
//!
//! - The bearer token is never logged
//! - Only HTTP method, path, and status codes are logged

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::error::EngineError;
use crate::source::{Record, RowFetcher, SyncPage};

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// One page as the remote serves it.
#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default, alias = "hasMore")]
    has_more: bool,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    total: Option<u64>,
}

/// Remote error body format.
#[derive(Debug, Deserialize)]
struct RemoteError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpRowFetcher
// ─────────────────────────────────────────────────────────────────────────────

/// [`RowFetcher`] over a JSON endpoint with cursor pagination.
#[derive(Clone)]
pub struct HttpRowFetcher {
    /// Shared HTTP client.
    client: Arc<Client>,
    /// Full endpoint URL of the paginated collection.
    endpoint: Url,
    /// Bearer token, if the remote requires one.
    bearer_token: Option<String>,
}

impl HttpRowFetcher {
    /// Creates a fetcher for the given endpoint.
    pub fn new(client: Arc<Client>, endpoint: Url, bearer_token: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            bearer_token,
        }
    }

    async fn fetch_page_inner(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SyncPage, EngineError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        if let Some(c) = cursor {
            url.query_pairs_mut().append_pair("cursor", c);
        }

        info!(
            "[SYNC] GET {}{}",
            self.endpoint.path(),
            if cursor.is_some() { " (paginated)" } else { "" }
        );

        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::SourceFetch(format!("Sync page request failed: {e}")))?;

        let status = response.status();
        info!("[SYNC] GET {} -> {}", self.endpoint.path(), status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let page: PageResponse = response
            .json()
            .await
            .map_err(|e| EngineError::SourceFetch(format!("Failed to parse sync page: {e}")))?;

        Ok(SyncPage {
            items: page.items.iter().map(flatten_item).collect(),
            has_more: page.has_more,
            cursor: page.cursor,
            total: page.total,
        })
    }
}

impl RowFetcher for HttpRowFetcher {
    fn fetch_page<'a>(
        &'a self,
        cursor: Option<&'a str>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<SyncPage, EngineError>> + Send + 'a>> {
        Box::pin(self.fetch_page_inner(cursor, limit))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a non-success response into the matching error variant.
async fn parse_error_response(
    response: reqwest::Response,
    status: reqwest::StatusCode,
) -> EngineError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return EngineError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return EngineError::NotFound("Sync endpoint not found".to_string());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(err) = serde_json::from_str::<RemoteError>(&body) {
        return EngineError::SourceFetch(match err.code {
            Some(code) => format!("[{}] {}", code, err.message),
            None => err.message,
        });
    }

    EngineError::SourceFetch(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

/// Flattens one JSON item into a [`Record`]: scalars are stringified, null
/// becomes empty, nested values are carried as compact JSON.
fn flatten_item(item: &Value) -> Record {
    let mut record = Record::new();

    if let Value::Object(map) = item {
        for (key, value) in map {
            let rendered = match value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                nested => nested.to_string(),
            };
            record.push(key.clone(), rendered);
        }
    }

    record
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
